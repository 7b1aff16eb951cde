//! Managing-deanery contact lookup and selection.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::Mutex;

use crate::client::ContactsApi;

/// Fallback contact string when the reference service has nothing usable.
pub const DEFAULT_CONTACT: &str = "your local deanery office";

/// Contact types published by the reference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalOfficeContactType {
    Ltft,
    LtftSupport,
    SupportedReturnToTraining,
    TssSupport,
    GmcUpdate,
}

/// How a contact string can be presented: a mail link, a hyperlink, or
/// plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactClassification {
    Email,
    Url,
    NonHref,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalOfficeContact {
    pub contact_type_name: Option<String>,
    pub contact: Option<String>,
}

/// Looks up deanery contact lists, caching results for the lifetime of one
/// planner invocation.
pub struct ContactsResolver {
    api: Arc<dyn ContactsApi>,
    cache: Mutex<HashMap<String, Vec<LocalOfficeContact>>>,
}

impl ContactsResolver {
    pub fn new(api: Arc<dyn ContactsApi>) -> Self {
        Self {
            api,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The deanery's contact list; unavailable or unknown deaneries resolve
    /// to an empty list so callers fall back to [`DEFAULT_CONTACT`].
    pub async fn contact_list(&self, deanery: Option<&str>) -> Vec<LocalOfficeContact> {
        let Some(deanery) = deanery else {
            return Vec::new();
        };

        if let Some(cached) = self.cache.lock().await.get(deanery) {
            return cached.clone();
        }

        match self.api.contact_list(deanery).await {
            Ok(contacts) => {
                self.cache
                    .lock()
                    .await
                    .insert(deanery.to_string(), contacts.clone());
                contacts
            }
            Err(err) => {
                tracing::warn!(deanery, err = %err, "contact list unavailable");
                Vec::new()
            }
        }
    }

    /// First contact of the primary type, else of the fallback type, else the
    /// given default.
    pub fn pick(
        contacts: &[LocalOfficeContact],
        primary: LocalOfficeContactType,
        fallback: LocalOfficeContactType,
        default: &str,
    ) -> String {
        Self::find_type(contacts, primary)
            .or_else(|| Self::find_type(contacts, fallback))
            .unwrap_or_else(|| default.to_string())
    }

    fn find_type(
        contacts: &[LocalOfficeContact],
        contact_type: LocalOfficeContactType,
    ) -> Option<String> {
        let wanted = contact_type.to_string();
        contacts
            .iter()
            .filter(|entry| {
                entry
                    .contact_type_name
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case(&wanted))
            })
            .find_map(|entry| entry.contact.clone())
    }

    /// Classifies a contact string for presentation.
    pub fn classify(contact: &str) -> ContactClassification {
        if url::Url::parse(contact).is_ok() {
            ContactClassification::Url
        } else if contact.contains('@') && !contact.contains(char::is_whitespace) {
            ContactClassification::Email
        } else {
            ContactClassification::NonHref
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::NotifyError;

    struct CountingApi {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ContactsApi for CountingApi {
        async fn contact_list(
            &self,
            _deanery: &str,
        ) -> Result<Vec<LocalOfficeContact>, NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![LocalOfficeContact {
                contact_type_name: Some("LTFT".to_string()),
                contact: Some("england.ltft@nhs.net".to_string()),
            }])
        }
    }

    #[test]
    fn classify_distinguishes_url_email_and_text() {
        assert_eq!(
            ContactsResolver::classify("https://support.example.com/ltft"),
            ContactClassification::Url
        );
        assert_eq!(
            ContactsResolver::classify("england.ltft@nhs.net"),
            ContactClassification::Email
        );
        assert_eq!(
            ContactsResolver::classify("your local deanery office"),
            ContactClassification::NonHref
        );
        // An address with embedded whitespace is not a usable mail link.
        assert_eq!(
            ContactsResolver::classify("someone @nhs.net"),
            ContactClassification::NonHref
        );
    }

    #[test]
    fn pick_prefers_primary_then_fallback_then_default() {
        let contacts = vec![
            LocalOfficeContact {
                contact_type_name: Some("TSS_SUPPORT".to_string()),
                contact: Some("support@nhs.net".to_string()),
            },
            LocalOfficeContact {
                contact_type_name: Some("LTFT".to_string()),
                contact: Some("ltft@nhs.net".to_string()),
            },
        ];

        assert_eq!(
            ContactsResolver::pick(
                &contacts,
                LocalOfficeContactType::Ltft,
                LocalOfficeContactType::TssSupport,
                DEFAULT_CONTACT
            ),
            "ltft@nhs.net"
        );
        assert_eq!(
            ContactsResolver::pick(
                &contacts,
                LocalOfficeContactType::LtftSupport,
                LocalOfficeContactType::TssSupport,
                DEFAULT_CONTACT
            ),
            "support@nhs.net"
        );
        assert_eq!(
            ContactsResolver::pick(
                &[],
                LocalOfficeContactType::LtftSupport,
                LocalOfficeContactType::TssSupport,
                DEFAULT_CONTACT
            ),
            DEFAULT_CONTACT
        );
    }

    #[tokio::test]
    async fn contact_lists_are_cached_per_resolver() {
        let api = Arc::new(CountingApi {
            calls: AtomicUsize::new(0),
        });
        let resolver = ContactsResolver::new(api.clone());

        let first = resolver.contact_list(Some("NHSE Thames Valley")).await;
        let second = resolver.contact_list(Some("NHSE Thames Valley")).await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        assert!(resolver.contact_list(None).await.is_empty());
    }
}
