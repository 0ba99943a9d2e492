//! Property and property group API

use crm_api::{
    BatchInput, BatchResponse, Property, PropertyGroup, PropertyGroupInput, PropertyInput,
    PropertyOptionsUpdate,
};

use crate::authn::Credential;
use crate::errors::RemoteError;
use crate::http::client::{path_segment, HttpClient};
use crate::models::configuration::ObjectType;

/// Internal name of the contact lifecycle property
const LIFECYCLE_PROPERTY: &str = "lifecyclestage";

impl HttpClient {
    pub async fn create_property_group(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        input: &PropertyGroupInput,
    ) -> Result<PropertyGroup, RemoteError> {
        let path = format!("/crm/v3/properties/{}/groups", object_type);
        self.post(&path, credential, input).await
    }

    pub async fn delete_property_group(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError> {
        let path = format!(
            "/crm/v3/properties/{}/groups/{}",
            object_type,
            path_segment(name)
        );
        self.delete(&path, credential).await
    }

    pub async fn create_property(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        input: &PropertyInput,
    ) -> Result<Property, RemoteError> {
        let path = format!("/crm/v3/properties/{}", object_type);
        self.post(&path, credential, input).await
    }

    /// Create up to the CRM's batch ceiling of properties in one request
    pub async fn create_properties_batch(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        inputs: &BatchInput<PropertyInput>,
    ) -> Result<BatchResponse<Property>, RemoteError> {
        let path = format!("/crm/v3/properties/{}/batch/create", object_type);
        self.post(&path, credential, inputs).await
    }

    pub async fn get_property(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<Property, RemoteError> {
        let path = format!("/crm/v3/properties/{}/{}", object_type, path_segment(name));
        self.get(&path, credential).await
    }

    pub async fn delete_property(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        name: &str,
    ) -> Result<(), RemoteError> {
        let path = format!("/crm/v3/properties/{}/{}", object_type, path_segment(name));
        self.delete(&path, credential).await
    }

    /// Replace the option list of the contact lifecycle stage property
    pub async fn update_lifecycle_stages(
        &self,
        credential: &Credential,
        update: &PropertyOptionsUpdate,
    ) -> Result<Property, RemoteError> {
        let path = format!(
            "/crm/v3/properties/{}/{}",
            ObjectType::Contacts,
            LIFECYCLE_PROPERTY
        );
        self.patch(&path, credential, update).await
    }
}
