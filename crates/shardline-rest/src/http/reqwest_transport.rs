use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::multipart::{Form, Part};

use super::{HttpRequest, HttpResponse, HttpTransport, HttpTransportError};
use crate::request::{FileAttachment, RequestBody};

const USER_AGENT_VALUE: &str = concat!(
    "DiscordBot (https://github.com/shardline/shardline, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpTransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .header(AUTHORIZATION, request.authorization)
            .header(USER_AGENT, USER_AGENT_VALUE);

        builder = match request.body {
            RequestBody::None => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart { payload, files } => {
                builder.multipart(multipart_form(&payload, files)?)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| HttpTransportError(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpTransportError(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(
    payload: &serde_json::Value,
    files: Vec<FileAttachment>,
) -> Result<Form, HttpTransportError> {
    let mut form = Form::new().text("payload_json", payload.to_string());
    for (index, file) in files.into_iter().enumerate() {
        let mut part = Part::bytes(file.data).file_name(file.filename);
        if let Some(content_type) = file.content_type {
            part = part
                .mime_str(&content_type)
                .map_err(|e| HttpTransportError(e.to_string()))?;
        }
        form = form.part(format!("files[{index}]"), part);
    }
    Ok(form)
}
