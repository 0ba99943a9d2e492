//! Account API

use crm_api::AccountDetails;

use crate::authn::Credential;
use crate::errors::RemoteError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Read the account the credential belongs to
    pub async fn get_account_details(
        &self,
        credential: &Credential,
    ) -> Result<AccountDetails, RemoteError> {
        self.get("/account-info/v3/details", credential).await
    }
}
