use actix_files::Files;
use actix_multipart::{Field, Multipart};
use actix_web::{web, App, HttpResponse, HttpServer};
use futures::TryStreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cleanup::CleanupScheduler;
use crate::detector::Detector;
use crate::errors::PredictError;
use crate::inference::{run_inference, InferenceOutcome};
use crate::storage::{self, Run, StoragePaths};

/// Everything a request needs, shared by all workers.
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<dyn Detector>,
    pub storage: StoragePaths,
    pub cleanup: CleanupScheduler,
    pub upload_field: String,
}

// Enough leading bytes for `image::guess_format` to recognise any format.
const SNIFF_LEN: usize = 64;

fn multipart_error(err: actix_multipart::MultipartError) -> PredictError {
    PredictError::Multipart(err.to_string())
}

/// Skips ahead to the form field carrying the image.
async fn upload_field(payload: &mut Multipart, field_name: &str) -> Result<Field, PredictError> {
    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        if field.content_disposition().get_name() == Some(field_name) {
            return Ok(field);
        }
        while field.try_next().await.map_err(multipart_error)?.is_some() {}
    }
    Err(PredictError::MissingUpload(field_name.to_string()))
}

/// Reads the first chunks of `field` until there are enough bytes to sniff.
async fn read_head(field: &mut Field) -> Result<Vec<u8>, PredictError> {
    let mut head = Vec::new();
    while head.len() < SNIFF_LEN {
        match field.try_next().await.map_err(multipart_error)? {
            Some(chunk) => head.extend_from_slice(&chunk),
            None => break,
        }
    }
    Ok(head)
}

async fn infer(data: &AppState, run: &Run, source: PathBuf) -> Result<InferenceOutcome, PredictError> {
    let detector = Arc::clone(&data.detector);
    let storage = data.storage.clone();
    let run = run.clone();
    web::block(move || run_inference(detector.as_ref(), &storage, &run, &source))
        .await
        .map_err(|_| PredictError::Cancelled)?
}

pub async fn predict(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, PredictError> {
    let mut field = upload_field(&mut payload, &data.upload_field).await?;
    let filename = field.content_disposition().get_filename().map(str::to_string);
    let head = read_head(&mut field).await?;
    if image::guess_format(&head).is_err() {
        warn!("Rejected upload {:?}: not an image", filename);
        return Err(PredictError::UnsupportedFormat);
    }

    let run = data.storage.reserve_run()?;
    let input_path = data.storage.upload_path(&run, filename.as_deref());
    let run_dir = data.storage.run_dir(&run);

    let saved = storage::save_upload(&input_path, &head, field.map_err(multipart_error)).await;
    let result = match saved {
        Ok(size) => {
            info!("{}: received {} ({} bytes)", run, input_path.display(), size);
            infer(&data, &run, input_path.clone()).await
        }
        Err(e) => Err(e),
    };

    data.cleanup.schedule(input_path);
    if let Ok(outcome) = &result {
        if outcome.save_dir != run_dir {
            data.cleanup.schedule(outcome.save_dir.clone());
        }
    }
    data.cleanup.schedule(run_dir);

    match result {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome.response)),
        Err(e) => {
            warn!("{}: {}", run, e);
            Err(e)
        }
    }
}

/// Routes and state for one app instance; used by the server and by tests.
pub fn configure(state: AppState) -> impl Fn(&mut web::ServiceConfig) + Clone {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::new(state.clone()))
            .service(web::resource("/predict2").route(web::post().to(predict)))
            // Annotated images, until cleanup removes them
            .service(
                Files::new("/output", state.storage.output_dir.clone()).use_last_modified(true),
            );
    }
}

pub async fn start_server(state: AppState, bind: &str, workers: Option<usize>) -> std::io::Result<()> {
    let routes = configure(state);
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(
                actix_cors::Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .configure(routes.clone())
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    info!("Listening on {}", bind);
    server
        .bind(bind)?
        .keep_alive(std::time::Duration::from_secs(900))
        .client_request_timeout(std::time::Duration::from_secs(900))
        .run()
        .await
}
