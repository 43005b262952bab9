use actix_web::{App, test, web};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

use backend::config::Settings;
use backend::model::ModelService;
use backend::preprocess::ImageProcessor;
use backend::routes::configure_routes;
use shared::{
    BatchResponse, ClassesResponse, HealthResponse, ModelInfoResponse, PredictionResponse,
};

const BOUNDARY: &str = "test-boundary-7f1a2c";

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    // No artifact on disk: the service comes up on the stub.
    settings.model_path = "does-not-exist.pt".to_string();
    settings
}

fn build_app(
    settings: Settings,
) -> App<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let mut model = ModelService::new(&settings);
    model.load();
    let processor = ImageProcessor::new(&settings);

    App::new()
        .app_data(web::Data::new(model))
        .app_data(web::Data::new(processor))
        .app_data(web::Data::new(settings))
        .configure(configure_routes)
}

/// Builds a multipart/form-data body by hand; returns (content-type, body).
fn multipart_body(parts: &[(&str, &str, &[u8])]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (filename, content_type, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

fn solid_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

#[actix_web::test]
async fn root_reports_running() {
    let app = test::init_service(build_app(test_settings())).await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert!(resp.status().is_success());
    let body: HealthResponse = test::read_body_json(resp).await;
    assert_eq!(body.status, "healthy");
}

#[actix_web::test]
async fn health_is_degraded_on_stub_model() {
    let app = test::init_service(build_app(test_settings())).await;
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
    let body: HealthResponse = test::read_body_json(resp).await;
    assert_eq!(body.status, "degraded");
    assert!(!body.version.is_empty());
}

#[actix_web::test]
async fn classes_match_configuration() {
    let settings = test_settings();
    let expected = settings.class_names.clone();
    let app = test::init_service(build_app(settings)).await;

    let resp =
        test::call_service(&app, test::TestRequest::get().uri("/classes").to_request()).await;
    assert!(resp.status().is_success());
    let body: ClassesResponse = test::read_body_json(resp).await;
    assert_eq!(body.classes, expected);
    assert_eq!(body.num_classes, expected.len());
}

#[actix_web::test]
async fn model_info_reports_stub_state() {
    let app = test::init_service(build_app(test_settings())).await;
    let resp =
        test::call_service(&app, test::TestRequest::get().uri("/model-info").to_request()).await;
    assert!(resp.status().is_success());
    let body: ModelInfoResponse = test::read_body_json(resp).await;
    assert_eq!(body.status, "stubbed");
    assert_eq!(body.input_shape, vec![1, 224, 224, 3]);
    assert_eq!(body.num_classes, 5);
}

#[actix_web::test]
async fn predict_returns_a_distribution_for_a_red_jpeg() {
    let settings = test_settings();
    let class_names = settings.class_names.clone();
    let app = test::init_service(build_app(settings)).await;

    let jpeg = solid_jpeg(224, 224, [255, 0, 0]);
    let (content_type, body) = multipart_body(&[("lesion.jpg", "image/jpeg", &jpeg)]);
    let req = test::TestRequest::post()
        .uri("/predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let result: PredictionResponse = test::read_body_json(resp).await;
    assert!(class_names.contains(&result.prediction));
    assert!((0.0..=1.0).contains(&result.confidence));
    assert_eq!(result.probabilities.len(), 5);
    let sum: f32 = result.probabilities.values().sum();
    assert!((sum - 1.0).abs() < 1e-3, "probabilities sum to {}", sum);
}

#[actix_web::test]
async fn predict_rejects_non_image_content_type() {
    let app = test::init_service(build_app(test_settings())).await;

    let (content_type, body) =
        multipart_body(&[("notes.txt", "text/plain", b"not an image".as_slice())]);
    let req = test::TestRequest::post()
        .uri("/predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn predict_rejects_undecodable_image_bytes() {
    let app = test::init_service(build_app(test_settings())).await;

    let (content_type, body) =
        multipart_body(&[("broken.jpg", "image/jpeg", b"garbage bytes".as_slice())]);
    let req = test::TestRequest::post()
        .uri("/predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn predict_without_a_file_is_a_client_error() {
    let app = test::init_service(build_app(test_settings())).await;

    let (content_type, body) = multipart_body(&[]);
    let req = test::TestRequest::post()
        .uri("/predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn predict_rejects_oversized_upload() {
    let mut settings = test_settings();
    settings.max_file_size = 128;
    let app = test::init_service(build_app(settings)).await;

    let jpeg = solid_jpeg(224, 224, [0, 128, 255]);
    let (content_type, body) = multipart_body(&[("big.jpg", "image/jpeg", &jpeg)]);
    let req = test::TestRequest::post()
        .uri("/predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn batch_rejects_more_than_ten_files() {
    let app = test::init_service(build_app(test_settings())).await;

    let jpeg = solid_jpeg(64, 64, [40, 80, 120]);
    let parts: Vec<(&str, &str, &[u8])> =
        (0..11).map(|_| ("img.jpg", "image/jpeg", jpeg.as_slice())).collect();
    let (content_type, body) = multipart_body(&parts);
    let req = test::TestRequest::post()
        .uri("/batch-predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn batch_returns_one_result_per_file() {
    let app = test::init_service(build_app(test_settings())).await;

    let a = solid_jpeg(100, 80, [200, 30, 30]);
    let b = solid_jpeg(64, 64, [30, 30, 200]);
    let (content_type, body) = multipart_body(&[
        ("a.jpg", "image/jpeg", a.as_slice()),
        ("b.jpg", "image/jpeg", b.as_slice()),
    ]);
    let req = test::TestRequest::post()
        .uri("/batch-predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let batch: BatchResponse = test::read_body_json(resp).await;
    assert_eq!(batch.results.len(), 2);
    for item in &batch.results {
        assert!(item.prediction.is_some(), "missing prediction for {}", item.filename);
        assert!(item.error.is_none());
    }
}

#[actix_web::test]
async fn batch_isolates_per_file_failures() {
    let app = test::init_service(build_app(test_settings())).await;

    let good = solid_jpeg(64, 64, [120, 120, 120]);
    let (content_type, body) = multipart_body(&[
        ("good.jpg", "image/jpeg", good.as_slice()),
        ("bad.jpg", "image/jpeg", b"corrupt".as_slice()),
        ("notes.txt", "text/plain", b"hello".as_slice()),
    ]);
    let req = test::TestRequest::post()
        .uri("/batch-predict")
        .insert_header(("content-type", content_type))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let batch: BatchResponse = test::read_body_json(resp).await;
    assert_eq!(batch.results.len(), 3);
    assert!(batch.results[0].prediction.is_some());
    assert!(batch.results[1].error.is_some());
    assert_eq!(batch.results[2].error.as_deref(), Some("Invalid file type"));
}
