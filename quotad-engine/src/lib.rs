
pub mod engine;
pub mod maildirsize;
pub mod resolver;

pub use engine::QuotaEngine;
pub use engine::QuotaKind;
pub use maildirsize::MaildirSizeParser;
pub use resolver::FsEngine;
