pub mod client;
mod contacts;
mod email;
mod error;
mod in_app;
mod object_store;
mod recipient;
mod template;
mod transport;

pub use contacts::{
    ContactClassification, ContactsResolver, LocalOfficeContact, LocalOfficeContactType,
    DEFAULT_CONTACT,
};
pub use email::{hashed_email, EmailRequest, EmailSender, NO_EMAIL_DETAIL};
pub use error::NotifyError;
pub use in_app::InAppSender;
pub use object_store::{FsObjectStore, ObjectStore, StoredObject};
pub use recipient::RecipientResolver;
pub use template::{TemplateRenderer, TemplateVersions};
pub use transport::{MailTransport, NotificationIdHeader, SmtpConfig, SmtpMailer};
