use std::{fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionLabel {
    Happy,
    Sad,
    Angry,
    Surprised,
    Fearful,
    Neutral,
    Unknown,
}

impl ExpressionLabel {
    pub const ALL: [ExpressionLabel; 7] = [
        ExpressionLabel::Happy,
        ExpressionLabel::Sad,
        ExpressionLabel::Angry,
        ExpressionLabel::Surprised,
        ExpressionLabel::Fearful,
        ExpressionLabel::Neutral,
        ExpressionLabel::Unknown,
    ];

    /// Lenient name lookup. Anything outside the closed set is `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "happy" => ExpressionLabel::Happy,
            "sad" => ExpressionLabel::Sad,
            "angry" => ExpressionLabel::Angry,
            "surprised" | "surprise" => ExpressionLabel::Surprised,
            "fearful" | "fear" => ExpressionLabel::Fearful,
            "neutral" => ExpressionLabel::Neutral,
            _ => ExpressionLabel::Unknown,
        }
    }
}

impl AsRef<str> for ExpressionLabel {
    fn as_ref(&self) -> &str {
        match self {
            ExpressionLabel::Happy => "happy",
            ExpressionLabel::Sad => "sad",
            ExpressionLabel::Angry => "angry",
            ExpressionLabel::Surprised => "surprised",
            ExpressionLabel::Fearful => "fearful",
            ExpressionLabel::Neutral => "neutral",
            ExpressionLabel::Unknown => "unknown",
        }
    }
}

impl Display for ExpressionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = self.as_ref();
        write!(f, "{label}")
    }
}

/// One encoded still image (JPEG, PNG, ...) as produced by a camera or a file.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl Prediction {
    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

pub trait ExpressionModel: Send {
    /// `Ok(None)` means no face was found in the frame.
    fn predict(&mut self, frame: &Frame) -> anyhow::Result<Option<Prediction>>;

    fn name(&self) -> &str;
}

/// Maps frames to labels. Never fails: every doubtful case is `Unknown`.
pub struct ExpressionClassifier {
    model: Box<dyn ExpressionModel>,
    min_confidence: f32,
}

impl ExpressionClassifier {
    pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.4;

    pub fn new(model: Box<dyn ExpressionModel>, min_confidence: f32) -> Self {
        Self {
            model,
            min_confidence,
        }
    }

    pub fn classify(&mut self, frame: &Frame) -> ExpressionLabel {
        if frame.is_empty() {
            return ExpressionLabel::Unknown;
        }

        match self.model.predict(frame) {
            Ok(Some(prediction)) if prediction.confidence >= self.min_confidence => {
                ExpressionLabel::from_name(&prediction.label)
            }
            Ok(Some(prediction)) => {
                log::debug!(
                    "{}: `{}` below confidence threshold ({:.2} < {:.2})",
                    self.model.name(),
                    prediction.label,
                    prediction.confidence,
                    self.min_confidence
                );
                ExpressionLabel::Unknown
            }
            Ok(None) => ExpressionLabel::Unknown,
            Err(err) => {
                log::warn!("{}: classification failed: {err:#}", self.model.name());
                ExpressionLabel::Unknown
            }
        }
    }
}

/// Always reports the same label. Used when there is no camera model to run.
pub struct FixedExpressionModel {
    label: ExpressionLabel,
}

impl FixedExpressionModel {
    pub fn new(label: ExpressionLabel) -> Self {
        Self { label }
    }
}

impl ExpressionModel for FixedExpressionModel {
    fn predict(&mut self, _frame: &Frame) -> anyhow::Result<Option<Prediction>> {
        Ok(Some(Prediction {
            label: self.label.to_string(),
            confidence: 1.0,
            width: 0,
            height: 0,
        }))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[derive(Debug, Deserialize)]
struct FacesResponse {
    #[serde(default)]
    faces: Vec<Prediction>,
}

/// Talks to a face + emotion detection sidecar over HTTP.
///
/// The frame is posted as-is with its media type. The sidecar answers
/// `{"faces": [{"label": "happy", "confidence": 0.9, "width": 120, "height": 130}]}`.
pub struct HttpExpressionModel {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpExpressionModel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl ExpressionModel for HttpExpressionModel {
    fn predict(&mut self, frame: &Frame) -> anyhow::Result<Option<Prediction>> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, frame.media_type.as_str())
            .body(frame.bytes.clone())
            .send()?
            .error_for_status()?;
        let faces: FacesResponse = response.json()?;
        Ok(largest_face(faces.faces))
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn largest_face(faces: Vec<Prediction>) -> Option<Prediction> {
    faces.into_iter().max_by_key(Prediction::area)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpListener,
    };

    use super::*;

    struct NoFace;

    impl ExpressionModel for NoFace {
        fn predict(&mut self, _frame: &Frame) -> anyhow::Result<Option<Prediction>> {
            Ok(None)
        }
        fn name(&self) -> &str {
            "no-face"
        }
    }

    struct Broken;

    impl ExpressionModel for Broken {
        fn predict(&mut self, _frame: &Frame) -> anyhow::Result<Option<Prediction>> {
            anyhow::bail!("model weights missing")
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    struct Scored(&'static str, f32);

    impl ExpressionModel for Scored {
        fn predict(&mut self, _frame: &Frame) -> anyhow::Result<Option<Prediction>> {
            Ok(Some(Prediction {
                label: self.0.to_string(),
                confidence: self.1,
                width: 10,
                height: 10,
            }))
        }
        fn name(&self) -> &str {
            "scored"
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0xff, 0xd8, 0xff], "image/jpeg")
    }

    #[test]
    fn no_face_is_unknown() {
        let mut classifier = ExpressionClassifier::new(Box::new(NoFace), 0.4);
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Unknown);
    }

    #[test]
    fn model_error_is_unknown() {
        let mut classifier = ExpressionClassifier::new(Box::new(Broken), 0.4);
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Unknown);
    }

    #[test]
    fn low_confidence_is_unknown() {
        let mut classifier = ExpressionClassifier::new(Box::new(Scored("happy", 0.2)), 0.4);
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Unknown);

        let mut classifier = ExpressionClassifier::new(Box::new(Scored("happy", 0.4)), 0.4);
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Happy);
    }

    #[test]
    fn labels_outside_the_set_are_unknown() {
        let mut classifier = ExpressionClassifier::new(Box::new(Scored("excited", 0.9)), 0.4);
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Unknown);
    }

    #[test]
    fn empty_frame_is_unknown() {
        let mut classifier = ExpressionClassifier::new(
            Box::new(FixedExpressionModel::new(ExpressionLabel::Sad)),
            0.4,
        );
        assert_eq!(
            classifier.classify(&Frame::new(Vec::new(), "image/png")),
            ExpressionLabel::Unknown
        );
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Sad);
    }

    #[test]
    fn label_names_round_trip() {
        for label in ExpressionLabel::ALL {
            assert_eq!(ExpressionLabel::from_name(label.as_ref()), label);
        }
        assert_eq!(ExpressionLabel::from_name(" Fear "), ExpressionLabel::Fearful);
    }

    #[test]
    fn largest_face_wins() {
        let face = |label: &str, w, h| Prediction {
            label: label.to_string(),
            confidence: 0.9,
            width: w,
            height: h,
        };
        let picked = largest_face(vec![face("sad", 10, 10), face("happy", 40, 50), face("angry", 30, 30)]);
        assert_eq!(picked.unwrap().label, "happy");
        assert_eq!(largest_face(Vec::new()), None);
    }

    fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            // Headers, then the three image bytes of `frame()`.
            while !request.ends_with(&[0xff, 0xd8, 0xff]) {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{addr}/classify")
    }

    #[test]
    fn http_model_reads_faces() {
        let url = serve_once(r#"{"faces":[{"label":"surprised","confidence":0.8,"width":20,"height":20}]}"#);
        let model = HttpExpressionModel::new(url, Duration::from_secs(5)).unwrap();
        let mut classifier = ExpressionClassifier::new(Box::new(model), 0.4);
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Surprised);
    }

    #[test]
    fn http_model_without_faces_is_unknown() {
        let url = serve_once(r#"{"faces":[]}"#);
        let model = HttpExpressionModel::new(url, Duration::from_secs(5)).unwrap();
        let mut classifier = ExpressionClassifier::new(Box::new(model), 0.4);
        assert_eq!(classifier.classify(&frame()), ExpressionLabel::Unknown);
    }
}
