//! A small XML-RPC 1.0 client with the ROS response envelope baked in.

use dxr::{DxrError, Fault, FaultResponse, MethodCall, MethodResponse, TryFromValue, Value};
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::xmlrpc::protocol::{ApiError, ApiResponse};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to serialize XML-RPC request: {0}")]
    Serialize(String),
    #[error("Failed to parse XML-RPC response: {0}")]
    Parse(String),
    #[error(transparent)]
    Dxr(#[from] DxrError),
    #[error(transparent)]
    Net(#[from] reqwest::Error),
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Clone)]
pub struct Client {
    url: Url,
    client: reqwest::Client,
}

impl Client {
    pub fn new(url: Url) -> Self {
        Client {
            url,
            client: reqwest::Client::new(),
        }
    }

    /// Call a method and unwrap the ROS `[status, message, value]`
    /// envelope, returning the payload value on success.
    pub async fn call_raw(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let body = Self::request_body(&MethodCall::new(method.to_string(), params))?;

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;

        Self::parse_response(&response.text().await?)
    }

    fn request_body(call: &MethodCall) -> Result<String, ClientError> {
        let xml = dxr::serialize_xml(call).map_err(|e| ClientError::Serialize(e.to_string()))?;
        Ok(format!("<?xml version=\"1.0\"?>\n{xml}\n"))
    }

    fn parse_response(raw_response: &str) -> Result<Value, ClientError> {
        if let Ok(fault) = dxr::deserialize_xml::<FaultResponse>(raw_response) {
            return Err(Fault::try_from(fault)?.into());
        }

        let response: MethodResponse =
            dxr::deserialize_xml(raw_response).map_err(|e| ClientError::Parse(e.to_string()))?;

        // The success message is discarded; only the payload matters.
        match ApiResponse::try_from_value(&response.inner())? {
            ApiResponse::Success(_, value) => Ok(value),
            ApiResponse::Error(e) => Err(e.into()),
        }
    }
}
