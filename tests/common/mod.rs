//! Shared helpers for integration tests: mock models, photos and a stub HTTP service

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use damoon_upscale::{
    config::BackendConfig,
    inference::{share, SharedBackend},
    models::{ModelInfo, ModelSource, ModelSpec},
    InferenceBackend, LocalUpscalePipeline, ModelStage, RasterImage, Result,
};
use image::{Rgba, RgbaImage};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Nearest-neighbour resampling stand-in for a fixed-shape model
pub struct ScalingBackend {
    input: (usize, usize, usize, usize),
    output: (usize, usize, usize, usize),
    initialized: bool,
}

impl ScalingBackend {
    pub fn new(input: (usize, usize, usize, usize), output: (usize, usize, usize, usize)) -> Self {
        Self {
            input,
            output,
            initialized: false,
        }
    }
}

impl InferenceBackend for ScalingBackend {
    fn initialize(&mut self, _config: &BackendConfig) -> Result<Option<Duration>> {
        let first = !self.initialized;
        self.initialized = true;
        Ok(first.then(|| Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        assert_eq!(input.dim(), self.input, "model fed the wrong shape");
        let (_, _, ih, iw) = input.dim();
        let (_, _, oh, ow) = self.output;
        Ok(Array4::from_shape_fn(self.output, |(b, c, y, x)| {
            input[[b, c, y * ih / oh, x * iw / ow]]
        }))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.input
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.output
    }

    fn model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "scaling-mock".to_string(),
            source: "memory".to_string(),
            size_bytes: 0,
            input_shape: self.input,
            output_shape: self.output,
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

fn mock_stage(name: &str, spec: ModelSpec) -> ModelStage {
    let mut backend = ScalingBackend::new(spec.input_shape(), spec.output_shape());
    backend
        .initialize(&BackendConfig::default())
        .expect("mock init");
    let shared: SharedBackend = share(Box::new(backend));
    ModelStage::new(name, shared, spec)
}

/// 256x256 restoration followed by 512 -> 2048 super-resolution
pub fn production_shaped_pipeline() -> LocalUpscalePipeline {
    LocalUpscalePipeline::new(mock_stage(
        "super_resolution",
        ModelSpec::super_resolution("sr.onnx"),
    ))
    .with_restoration(mock_stage("restoration", ModelSpec::restoration("deblur.onnx")))
}

/// Tiny single-stage pipeline for tests that only care about routing
pub fn small_pipeline() -> LocalUpscalePipeline {
    LocalUpscalePipeline::new(mock_stage(
        "super_resolution",
        ModelSpec::new("sr", ModelSource::External("sr.onnx".into()), (16, 16), (64, 64)),
    ))
}

pub fn photo(width: u32, height: u32) -> RasterImage {
    RasterImage::from_rgba(RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 2 % 256) as u8, (y * 2 % 256) as u8, 128, 255])
    }))
}

/// JSON body the upscaling service answers with
pub fn service_body(field: &str, width: u32, height: u32) -> String {
    let png = photo(width, height).encode_png().expect("encode png");
    let mut body = serde_json::Map::new();
    body.insert("message".to_string(), "ok".into());
    body.insert(field.to_string(), STANDARD.encode(png).into());
    serde_json::Value::Object(body).to_string()
}

/// How the stub service answers
#[derive(Debug, Clone)]
pub enum Reply {
    Respond { status: u16, body: String },
    /// Read the request, then never answer
    Hang,
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        let wanted = name.to_ascii_lowercase();
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim().to_ascii_lowercase() == wanted).then(|| value.trim().to_string())
        })
    }

    pub fn body_contains(&self, needle: &[u8]) -> bool {
        self.body.windows(needle.len()).any(|w| w == needle)
    }
}

/// One-route HTTP service on a random local port
pub struct StubService {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl StubService {
    pub async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/run_inference", listener.local_addr().expect("addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let captured = Arc::clone(&captured);
                let reply = reply.clone();
                tokio::spawn(async move {
                    handle(stream, reply, captured).await;
                });
            }
        });

        Self {
            url,
            requests,
            task,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for StubService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut request = CapturedRequest {
        head,
        body: Vec::new(),
    };
    let length: Option<usize> = request
        .header("content-length")
        .and_then(|v| v.parse().ok());
    let chunked = request
        .header("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

    loop {
        let body = &buffer[header_end..];
        let complete = match length {
            Some(length) => body.len() >= length,
            None if chunked => body.ends_with(b"0\r\n\r\n"),
            None => true,
        };
        if complete {
            break;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    request.body = buffer[header_end..].to_vec();
    Some(request)
}

async fn handle(mut stream: TcpStream, reply: Reply, captured: Arc<Mutex<Vec<CapturedRequest>>>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    captured.lock().expect("requests lock").push(request);

    match reply {
        Reply::Respond { status, body } => {
            let reason = if status == 200 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\n\
                 content-type: application/json\r\n\
                 content-length: {}\r\n\
                 connection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        },
        Reply::Hang => {
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        },
    }
}
