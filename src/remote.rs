use crate::archive::DesignDocument;
use crate::core::{Color, GarmentType};
use crate::{Result, StudioError};
use base64::Engine;
use error_stack::ResultExt;
use serde::Deserialize;

/// Thin blocking client for the remote persistence API. The core only asks
/// for "fetch by id" and "store blob" from this boundary; everything else
/// the service does is opaque here. A failed save is retryable and never
/// touches local state.
pub struct DesignClient {
    base_url: String,
    agent: ureq::Agent,
}

/// Record returned by `GET /designs/{id}`.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteDesign {
    #[serde(rename = "canvasState")]
    pub canvas_state: DesignDocument,
    #[serde(rename = "garmentType", default)]
    pub garment_type: Option<GarmentType>,
    #[serde(rename = "tshirtColor", default)]
    pub color: Option<Color>,
    /// `None` when the record predates the flag; the session context decides.
    #[serde(rename = "isOwner", default)]
    pub is_owner: Option<bool>,
}

/// Payload for `POST|PUT /designs[/{id}]`.
pub struct SaveRequest<'a> {
    pub garment_type: GarmentType,
    pub color: Color,
    pub canvas_state: &'a DesignDocument,
    /// PNG bytes of the last composite, sent as a data URL.
    pub preview_png: Option<&'a [u8]>,
}

impl DesignClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    pub fn fetch(&self, design_id: &str) -> Result<RemoteDesign> {
        let url = format!("{}/designs/{design_id}", self.base_url);
        let response = self
            .agent
            .get(&url)
            .call()
            .change_context(StudioError::ResourceUnavailable)
            .attach_lazy(|| format!("failed to fetch design {design_id}"))?;
        response
            .into_body()
            .read_json::<RemoteDesign>()
            .change_context(StudioError::ResourceUnavailable)
            .attach("design record is not in the expected shape")
    }

    /// Create (`design_id: None`) or update a design. Returns the id.
    pub fn save(&self, design_id: Option<&str>, request: &SaveRequest<'_>) -> Result<String> {
        let preview = request.preview_png.map(|png| {
            format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(png)
            )
        });
        let payload = serde_json::json!({
            "tshirtType": request.garment_type,
            "tshirtColor": request.color,
            "garmentType": request.garment_type,
            "canvasState": request.canvas_state,
            "previewImage": preview,
        });
        let body = serde_json::to_string(&payload).change_context(StudioError::RemoteSaveFailure)?;

        let response = match design_id {
            Some(id) => self
                .agent
                .put(&format!("{}/designs/{id}", self.base_url))
                .content_type("application/json")
                .send(body.as_bytes()),
            None => self
                .agent
                .post(&format!("{}/designs", self.base_url))
                .content_type("application/json")
                .send(body.as_bytes()),
        }
        .change_context(StudioError::RemoteSaveFailure)
        .attach("persistence call failed")?;

        if let Some(id) = design_id {
            return Ok(id.to_owned());
        }
        let created: serde_json::Value = response
            .into_body()
            .read_json()
            .change_context(StudioError::RemoteSaveFailure)
            .attach("save response is not JSON")?;
        created["id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| error_stack::report!(StudioError::RemoteSaveFailure))
            .attach("save response has no id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::SCHEMA_VERSION;
    use std::collections::BTreeMap;

    #[test]
    fn save_failure_is_retryable_error() {
        // port 9 is the discard protocol; nothing listens there
        let client = DesignClient::new("http://127.0.0.1:9/api");
        let doc = DesignDocument {
            version: SCHEMA_VERSION.to_owned(),
            objects: BTreeMap::new(),
        };
        let err = client
            .save(
                None,
                &SaveRequest {
                    garment_type: GarmentType::TShirt,
                    color: Color::WHITE,
                    canvas_state: &doc,
                    preview_png: None,
                },
            )
            .unwrap_err();
        assert_eq!(*err.current_context(), StudioError::RemoteSaveFailure);
    }

    #[test]
    fn record_without_ownership_flag_stays_undecided() {
        let json = r#"{"canvasState":{"version":"1.0","objects":{}}}"#;
        let record: RemoteDesign = serde_json::from_str(json).unwrap();
        assert_eq!(record.is_owner, None);

        let json = r#"{"canvasState":{"version":"1.0","objects":{}},"isOwner":true}"#;
        let record: RemoteDesign = serde_json::from_str(json).unwrap();
        assert_eq!(record.is_owner, Some(true));
    }

    #[test]
    fn base_url_is_normalized() {
        let client = DesignClient::new("http://example.test/");
        assert_eq!(client.base_url, "http://example.test");
    }
}
