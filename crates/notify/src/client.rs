//! Thin typed clients for the REST collaborators. Every call has a fixed
//! timeout and tolerates absent or extra fields in the response body.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use traineehub_shared::{Action, TraineeProfile, UserAccountDetails};

use crate::contacts::LocalOfficeContact;
use crate::error::NotifyError;

#[async_trait::async_trait]
pub trait ProfileApi: Send + Sync {
    async fn account_details(&self, trainee_id: &str)
        -> Result<Option<TraineeProfile>, NotifyError>;
}

#[async_trait::async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn accounts_by_trainee(
        &self,
        trainee_id: &str,
    ) -> Result<Vec<UserAccountDetails>, NotifyError>;

    async fn accounts_by_email(&self, email: &str)
        -> Result<Vec<UserAccountDetails>, NotifyError>;
}

#[async_trait::async_trait]
pub trait ContactsApi: Send + Sync {
    async fn contact_list(&self, deanery: &str) -> Result<Vec<LocalOfficeContact>, NotifyError>;
}

#[async_trait::async_trait]
pub trait ActionsApi: Send + Sync {
    async fn actions(
        &self,
        person_id: &str,
        programme_id: &str,
    ) -> Result<Vec<Action>, NotifyError>;
}

#[derive(Clone)]
struct RestClient {
    http: Client,
    base: Url,
}

impl RestClient {
    fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let base = Url::parse(base_url)
            .map_err(|err| NotifyError::InvalidInput(format!("invalid base url: {err}")))?;
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self { http, base })
    }

    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, NotifyError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| NotifyError::InvalidInput("base url cannot hold a path".to_string()))?
            .extend(segments);

        Ok(url)
    }

    /// GET returning `T`, with 404 mapped to `None`.
    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<Option<T>, NotifyError> {
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.error_for_status()?.json().await?;
        Ok(Some(body))
    }
}

#[derive(Clone)]
pub struct ProfileClient(RestClient);

impl ProfileClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        Ok(Self(RestClient::new(base_url, timeout)?))
    }
}

#[async_trait::async_trait]
impl ProfileApi for ProfileClient {
    async fn account_details(
        &self,
        trainee_id: &str,
    ) -> Result<Option<TraineeProfile>, NotifyError> {
        let url = self
            .0
            .endpoint(["api", "trainee-profile", "account-details", trainee_id])?;
        self.0.get_optional(url).await
    }
}

#[derive(Clone)]
pub struct DirectoryClient(RestClient);

impl DirectoryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        Ok(Self(RestClient::new(base_url, timeout)?))
    }
}

#[async_trait::async_trait]
impl DirectoryApi for DirectoryClient {
    async fn accounts_by_trainee(
        &self,
        trainee_id: &str,
    ) -> Result<Vec<UserAccountDetails>, NotifyError> {
        let url = self
            .0
            .endpoint(["api", "user-account", "details", trainee_id])?;
        Ok(self.0.get_optional(url).await?.unwrap_or_default())
    }

    async fn accounts_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<UserAccountDetails>, NotifyError> {
        let url = self.0.endpoint(["api", "user-account", "by-email", email])?;
        Ok(self.0.get_optional(url).await?.unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct ReferenceClient(RestClient);

impl ReferenceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        Ok(Self(RestClient::new(base_url, timeout)?))
    }
}

#[async_trait::async_trait]
impl ContactsApi for ReferenceClient {
    async fn contact_list(&self, deanery: &str) -> Result<Vec<LocalOfficeContact>, NotifyError> {
        let url = self
            .0
            .endpoint(["api", "local-office-contact-by-lo-name", deanery])?;
        Ok(self.0.get_optional(url).await?.unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct ActionsClient(RestClient);

impl ActionsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        Ok(Self(RestClient::new(base_url, timeout)?))
    }
}

#[async_trait::async_trait]
impl ActionsApi for ActionsClient {
    async fn actions(
        &self,
        person_id: &str,
        programme_id: &str,
    ) -> Result<Vec<Action>, NotifyError> {
        let url = self.0.endpoint(["api", "action", person_id, programme_id])?;
        Ok(self.0.get_optional(url).await?.unwrap_or_default())
    }
}
