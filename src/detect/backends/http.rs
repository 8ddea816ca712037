use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::geometry::CenterBox;

/// Hosted inference endpoint.
///
/// The frame is JPEG-encoded and POSTed as the request body. The endpoint answers
/// with predictions in absolute-pixel centre form:
/// `{"predictions": [{"x": .., "y": .., "width": .., "height": .., "confidence": ..}]}`.
pub struct HttpBackend {
    url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    confidence: f32,
    #[serde(default)]
    class_id: u32,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| PipelineError::config(format!("invalid detector url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PipelineError::config(format!(
                "detector url must be http(s), got '{}'",
                parsed.scheme()
            )));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { url, agent })
    }

    fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        frame
            .to_rgb_image()
            .write_to(&mut out, image::ImageFormat::Jpeg)
            .map_err(|e| PipelineError::detector(format!("jpeg encode failed: {e}")))?;
        Ok(out.into_inner())
    }
}

pub(crate) fn parse_predictions(body: &str) -> Result<Vec<Detection>> {
    let response: PredictionResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::detector(format!("malformed detector response: {e}")))?;
    Ok(response
        .predictions
        .into_iter()
        .map(|p| Detection {
            bbox: CenterBox::pixels(p.x, p.y, p.width, p.height),
            confidence: p.confidence,
            class_id: p.class_id,
        })
        .collect())
}

impl DetectorBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = Self::encode_jpeg(frame)?;
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .map_err(|e| PipelineError::detector(format!("detector request failed: {e}")))?;
        let body = response
            .into_string()
            .map_err(|e| PipelineError::detector(format!("detector response unreadable: {e}")))?;
        parse_predictions(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CoordinateSpace;

    #[test]
    fn parses_prediction_payload() {
        let body = r#"{
            "time": 0.04,
            "predictions": [
                {"x": 100.0, "y": 50.0, "width": 20.0, "height": 10.0, "confidence": 0.75, "class": "litter"},
                {"x": 10, "y": 5, "width": 2, "height": 1, "confidence": 0.3, "class_id": 2}
            ]
        }"#;
        let detections = parse_predictions(body).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox.space, CoordinateSpace::AbsolutePixels);
        assert_eq!(detections[0].bbox.x, 100.0);
        assert_eq!(detections[0].confidence, 0.75);
        assert_eq!(detections[1].class_id, 2);
    }

    #[test]
    fn empty_predictions_are_valid() {
        assert!(parse_predictions(r#"{"predictions": []}"#).unwrap().is_empty());
        assert!(parse_predictions("{}").unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_detector_failure() {
        assert!(matches!(
            parse_predictions("not json"),
            Err(PipelineError::DetectorFailure(_))
        ));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(HttpBackend::new("ftp://example.com/model", Duration::from_secs(1)).is_err());
        assert!(HttpBackend::new("http://127.0.0.1:9001/infer", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn unreachable_endpoint_is_detector_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{port}/infer");
        let mut backend = HttpBackend::new(url, Duration::from_millis(200)).unwrap();
        let frame = Frame::new(0, Duration::ZERO, 4, 4, vec![128; 48]).unwrap();
        assert!(matches!(
            backend.detect(&frame),
            Err(PipelineError::DetectorFailure(_))
        ));
    }
}
