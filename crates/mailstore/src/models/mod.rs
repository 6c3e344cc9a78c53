//! Domain models for mail entities

mod attachment;
mod email;
mod session;
mod user;

pub use attachment::{Attachment, NewAttachment};
pub use email::{Email, Folder, OutgoingEmail, PageCursor};
pub use session::Session;
pub use user::{AdminBootstrap, NewUser, User, DEFAULT_MAX_STORAGE};
