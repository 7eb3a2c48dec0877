//! C7 File Attachment Cache + C8 Session Facade (§4.7, §4.8): the outward
//! binding of every other component to one workspace identity.

pub mod attachments;
pub mod error;
pub mod session;

pub use attachments::{AttachmentStorage, CachedAttachment, FileAttachmentCache, FileMetadata};
pub use error::SessionError;
pub use session::{RunTaskOptions, Session};
