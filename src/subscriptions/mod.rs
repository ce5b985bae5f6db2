//! Who is subscribed to what.

pub mod keywords;
pub mod store;

pub use keywords::{KeywordsMut, SubscriptionKeywords};
pub use store::{EmailUser, Keyword, STANDARD_KEYWORDS, Subscription, SubscriptionStore};
