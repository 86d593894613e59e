pub mod complaint;
pub mod notification;
pub mod user;

pub use complaint::{Complaint, ComplaintStatus};
pub use notification::Notification;
pub use user::{PublicUser, Role, User};
