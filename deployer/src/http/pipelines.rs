//! Pipeline API

use crm_api::{CollectionResponse, Pipeline, PipelineInput};

use crate::authn::Credential;
use crate::errors::RemoteError;
use crate::http::client::{path_segment, HttpClient};
use crate::models::configuration::ObjectType;

impl HttpClient {
    pub async fn create_pipeline(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        input: &PipelineInput,
    ) -> Result<Pipeline, RemoteError> {
        let path = format!("/crm/v3/pipelines/{}", object_type);
        self.post(&path, credential, input).await
    }

    pub async fn list_pipelines(
        &self,
        credential: &Credential,
        object_type: ObjectType,
    ) -> Result<Vec<Pipeline>, RemoteError> {
        let path = format!("/crm/v3/pipelines/{}", object_type);
        let response: CollectionResponse<Pipeline> = self.get(&path, credential).await?;
        Ok(response.results)
    }

    pub async fn delete_pipeline(
        &self,
        credential: &Credential,
        object_type: ObjectType,
        pipeline_id: &str,
    ) -> Result<(), RemoteError> {
        let path = format!(
            "/crm/v3/pipelines/{}/{}",
            object_type,
            path_segment(pipeline_id)
        );
        self.delete(&path, credential).await
    }
}
