//! Merges an identity-directory account with the trainee profile into a
//! single recipient view.

use std::sync::Arc;

use traineehub_shared::{Recipient, TraineeProfile, UserAccountDetails};

use crate::client::{DirectoryApi, ProfileApi};
use crate::error::NotifyError;

pub struct RecipientResolver {
    directory: Arc<dyn DirectoryApi>,
    profile: Arc<dyn ProfileApi>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn DirectoryApi>, profile: Arc<dyn ProfileApi>) -> Self {
        Self { directory, profile }
    }

    /// Resolves the recipient view for a trainee.
    ///
    /// A single directory account merged with the profile gives a registered
    /// recipient (contact details from the directory, title and GMC number
    /// from the profile). No account, or an ambiguous set of accounts, falls
    /// back to a profile-only, not-registered view; when no profile exists
    /// either, the corresponding error is returned.
    pub async fn resolve(&self, trainee_id: &str) -> Result<Recipient, NotifyError> {
        let accounts = match self.directory.accounts_by_trainee(trainee_id).await {
            Ok(accounts) => accounts,
            Err(err) => {
                tracing::warn!(trainee_id, err = %err, "identity directory unavailable");
                Vec::new()
            }
        };

        let profile = match self.profile.account_details(trainee_id).await {
            Ok(profile) => profile,
            Err(err) => {
                tracing::warn!(trainee_id, err = %err, "trainee profile unavailable");
                None
            }
        };

        match (accounts.len(), profile) {
            (1, profile) => Ok(Self::registered(trainee_id, &accounts[0], profile)),
            (0, Some(profile)) => Ok(Self::unregistered(trainee_id, profile)),
            (0, None) => Err(NotifyError::NoAccount(trainee_id.to_string())),
            (_, profile) => {
                let account_ids: Vec<String> =
                    accounts.into_iter().map(|account| account.user_id).collect();
                tracing::warn!(
                    trainee_id,
                    accounts = ?account_ids,
                    "multiple directory accounts for trainee"
                );

                match profile {
                    Some(profile) => Ok(Self::unregistered(trainee_id, profile)),
                    None => Err(NotifyError::AmbiguousAccount {
                        trainee_id: trainee_id.to_string(),
                        account_ids,
                    }),
                }
            }
        }
    }

    fn registered(
        trainee_id: &str,
        account: &UserAccountDetails,
        profile: Option<TraineeProfile>,
    ) -> Recipient {
        let profile = profile.unwrap_or_default();
        Recipient {
            trainee_id: trainee_id.to_string(),
            email: account.email.clone(),
            given_name: account.given_name.clone(),
            family_name: account.family_name.clone(),
            title: profile.title,
            gmc_number: profile.gmc_number,
            is_registered: true,
        }
    }

    fn unregistered(trainee_id: &str, profile: TraineeProfile) -> Recipient {
        Recipient {
            trainee_id: trainee_id.to_string(),
            email: profile.email,
            given_name: profile.given_name,
            family_name: profile.family_name,
            title: profile.title,
            gmc_number: profile.gmc_number,
            is_registered: false,
        }
    }
}
