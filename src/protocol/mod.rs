//! Mailing-list publish/subscribe protocol.
//!
//! Publishers own named topics and answer `subscribe` requests with an
//! initial sync; subscribers keep asking until the publisher answers or
//! the request times out.

pub mod mailing_list;
pub mod subscription;
pub mod wire;

pub use mailing_list::{MailingList, Producer, Publisher};
pub use subscription::{RESEND_PERIOD, SUBSCRIPTION_TIMEOUT, Subscriptions};
