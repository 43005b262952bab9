use actix_multipart::{Multipart, MultipartError};
use actix_web::{HttpResponse, web};
use futures_util::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Serialize;

use shared::{BatchItem, BatchResponse, ClassesResponse, HealthResponse};

use crate::config::Settings;
use crate::model::{ModelService, ModelStatus};
use crate::preprocess::ImageProcessor;

const MAX_BATCH_FILES: usize = 10;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/batch-predict").route(web::post().to(batch_predict)))
        .service(web::resource("/classes").route(web::get().to(get_classes)))
        .service(web::resource("/model-info").route(web::get().to(model_info)));
}

struct Upload {
    filename: String,
    content_type: Option<String>,
    data: Vec<u8>,
    oversized: bool,
}

impl Upload {
    fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
    }
}

/// Accumulates one field's chunks up to `max_bytes`. Once the limit is hit
/// the buffer stops growing for good, even if later chunks would fit.
struct UploadBuffer {
    data: Vec<u8>,
    max_bytes: usize,
    oversized: bool,
}

impl UploadBuffer {
    fn new(max_bytes: usize) -> Self {
        Self {
            data: Vec::new(),
            max_bytes,
            oversized: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.oversized || self.data.len() + chunk.len() > self.max_bytes {
            self.oversized = true;
            return;
        }
        self.data.extend_from_slice(chunk);
    }
}

async fn collect_uploads(
    payload: &mut Multipart,
    max_bytes: usize,
) -> Result<Vec<Upload>, MultipartError> {
    let mut uploads = Vec::new();

    while let Ok(Some(mut field)) = payload.try_next().await {
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename().map(str::to_string))
            .unwrap_or_else(|| "upload".to_string());
        let content_type = field.content_type().map(|m| m.essence_str().to_string());

        // Keep draining an oversized field so the next one parses cleanly.
        let mut buffer = UploadBuffer::new(max_bytes);
        while let Some(chunk) = field.next().await {
            buffer.push(&chunk?);
        }

        if buffer.data.is_empty() && !buffer.oversized {
            continue;
        }
        uploads.push(Upload {
            filename,
            content_type,
            data: buffer.data,
            oversized: buffer.oversized,
        });
    }

    Ok(uploads)
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        message: "Oral Lesion Classifier API is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn health(model: web::Data<ModelService>) -> HttpResponse {
    let status = model.status();
    let (state, message) = match status {
        ModelStatus::Loaded => ("healthy", "Model loaded"),
        ModelStatus::Stubbed => (
            "degraded",
            "Trained model unavailable; serving stub predictions",
        ),
        ModelStatus::NotLoaded => ("degraded", "Model not loaded"),
    };
    HttpResponse::Ok().json(HealthResponse {
        status: state.to_string(),
        message: message.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn predict(
    model: web::Data<ModelService>,
    processor: web::Data<ImageProcessor>,
    settings: web::Data<Settings>,
    mut payload: Multipart,
) -> HttpResponse {
    let uploads = match collect_uploads(&mut payload, settings.max_file_size).await {
        Ok(uploads) => uploads,
        Err(e) => {
            error!("Failed to read multipart payload: {}", e);
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new("Malformed multipart payload"));
        }
    };

    let Some(upload) = uploads.into_iter().next() else {
        return HttpResponse::BadRequest().json(ErrorResponse::new("No image file provided"));
    };

    if !upload.is_image() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(
            "Invalid file type. Please upload an image file (JPEG, PNG, JPG)",
        ));
    }
    if upload.oversized {
        return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
            "File exceeds the maximum upload size of {} bytes",
            settings.max_file_size
        )));
    }

    info!(
        "Received image: {}, size: {} bytes",
        upload.filename,
        upload.data.len()
    );

    let tensor = match processor.process(&upload.data) {
        Ok(tensor) => tensor,
        Err(e) => {
            error!("Validation error: {}", e);
            return HttpResponse::BadRequest().json(ErrorResponse::new(e.to_string()));
        }
    };

    match model.predict(&tensor) {
        Ok(result) => {
            info!(
                "Prediction: {} with confidence {:.2}",
                result.prediction, result.confidence
            );
            HttpResponse::Ok().json(result)
        }
        Err(e) => {
            error!("Error during prediction: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new("Error processing image"))
        }
    }
}

async fn batch_predict(
    model: web::Data<ModelService>,
    processor: web::Data<ImageProcessor>,
    settings: web::Data<Settings>,
    mut payload: Multipart,
) -> HttpResponse {
    let uploads = match collect_uploads(&mut payload, settings.max_file_size).await {
        Ok(uploads) => uploads,
        Err(e) => {
            error!("Failed to read multipart payload: {}", e);
            return HttpResponse::BadRequest()
                .json(ErrorResponse::new("Malformed multipart payload"));
        }
    };

    if uploads.len() > MAX_BATCH_FILES {
        return HttpResponse::BadRequest().json(ErrorResponse::new(format!(
            "Maximum {} images allowed per batch",
            MAX_BATCH_FILES
        )));
    }

    // Files are processed sequentially; one bad file never aborts the batch.
    let mut results = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let filename = upload.filename.clone();
        let item = if !upload.is_image() {
            BatchItem::failure(filename, "Invalid file type")
        } else if upload.oversized {
            BatchItem::failure(
                filename,
                format!(
                    "File exceeds the maximum upload size of {} bytes",
                    settings.max_file_size
                ),
            )
        } else {
            match processor
                .process(&upload.data)
                .map_err(|e| e.to_string())
                .and_then(|tensor| model.predict(&tensor).map_err(|e| e.to_string()))
            {
                Ok(result) => BatchItem::success(filename, result),
                Err(e) => {
                    error!("Batch item {} failed: {}", upload.filename, e);
                    BatchItem::failure(filename, e)
                }
            }
        };
        results.push(item);
    }

    HttpResponse::Ok().json(BatchResponse { results })
}

async fn get_classes(settings: web::Data<Settings>) -> HttpResponse {
    HttpResponse::Ok().json(ClassesResponse {
        classes: settings.class_names.clone(),
        num_classes: settings.class_names.len(),
    })
}

async fn model_info(model: web::Data<ModelService>) -> HttpResponse {
    HttpResponse::Ok().json(model.model_info())
}
