use log::info;
use rouille::{Request, Response, ResponseBody};
use serde::{Deserialize, Serialize};

use crate::{
    config::HttpConfig,
    domain::track::{TagMap, TrackHeader},
    http::{
        error::ApiError,
        multipart::{UploadLimits, parse_upload_form},
    },
    pipeline::{TrackService, download::TrackDownload},
};

pub const AUDIO_CONTENT_TYPE: &str = "audio/mp3";

pub struct HttpServer {
    service: TrackService,
    limits: UploadLimits,
    pub config: HttpConfig,
}

impl HttpServer {
    pub fn new(service: TrackService, config: HttpConfig, limits: UploadLimits) -> Self {
        Self {
            service,
            limits,
            config,
        }
    }

    pub fn run(self) {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        rouille::start_server(addr, move |request| self.handle_request(request));
    }

    fn handle_request(&self, request: &Request) -> Response {
        Self::log_request(request);

        let response = rouille::router!(request,
            (GET) (/) => {
                Response::text("Root endpoint!")
            },
            (GET) (/tracks) => {
                self.handle_list().unwrap_or_else(ApiError::into_response)
            },
            (GET) (/tracks/random) => {
                self.handle_random(request).unwrap_or_else(ApiError::into_response)
            },
            (GET) (/tracks/{id: String}) => {
                self.handle_download(&id).unwrap_or_else(ApiError::into_response)
            },
            (POST) (/tracks) => {
                self.handle_upload(request).unwrap_or_else(ApiError::into_response)
            },
            _ => Response::empty_404()
        );

        info!("Response: {} {}", request.method(), response.status_code);
        response
    }

    fn log_request(request: &Request) {
        info!("{} {}", request.method(), request.url());
    }

    fn handle_list(&self) -> Result<Response, ApiError> {
        let songs = self.service.catalog.list()?;
        Ok(Response::json(&SongsResponse::from_headers(&songs)))
    }

    fn handle_random(&self, request: &Request) -> Result<Response, ApiError> {
        let amount = self
            .service
            .catalog
            .resolve_amount(request.get_param("amount").as_deref())?;
        let songs = self.service.catalog.random(amount)?;
        Ok(Response::json(&SongsResponse::from_headers(&songs)))
    }

    /// Header lookup happens before the response starts, so a bad or unknown
    /// id still gets a proper status. Later failures abort the body.
    fn handle_download(&self, id: &str) -> Result<Response, ApiError> {
        let TrackDownload { header, body } = self.service.download.download(id)?;
        info!("STREAM {} -> 200 OK, {} bytes", header.id, header.length);

        Ok(Response {
            status_code: 200,
            headers: vec![("Content-Type".into(), AUDIO_CONTENT_TYPE.into())],
            data: ResponseBody::from_reader_and_size(body, header.length as usize),
            upgrade: None,
        }
        .with_additional_header("Accept-Ranges", "bytes"))
    }

    fn handle_upload(&self, request: &Request) -> Result<Response, ApiError> {
        let form = parse_upload_form(request, &self.limits)?;
        let header = self.service.upload.upload(form)?;
        let id = header.id.to_hex();

        Ok(Response::json(&UploadResponse {
            message: format!("File uploaded successfully, stored under id: {id}"),
            id,
        })
        .with_status_code(201))
    }
}

#[derive(Serialize, Deserialize)]
struct UploadResponse {
    message: String,
    id: String,
}

#[derive(Serialize, Deserialize)]
struct SongsResponse {
    songs: Vec<TrackHeaderResponse>,
}

impl SongsResponse {
    fn from_headers(headers: &[TrackHeader]) -> Self {
        Self {
            songs: headers.iter().map(TrackHeaderResponse::from_domain).collect(),
        }
    }
}

/// Stored file header, in the field layout GridFS clients expect
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackHeaderResponse {
    #[serde(rename = "_id")]
    id: String,
    filename: String,
    length: u64,
    chunk_size: u32,
    upload_date: String,
    metadata: TagMap,
    checksum: String,
}

impl TrackHeaderResponse {
    fn from_domain(header: &TrackHeader) -> Self {
        Self {
            id: header.id.to_hex(),
            filename: header.name.clone(),
            length: header.length,
            chunk_size: header.chunk_size,
            upload_date: header.upload_date.to_rfc3339(),
            metadata: header.metadata.clone(),
            checksum: header.checksum.clone(),
        }
    }
}

#[cfg(test)]
pub fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: rouille::Response,
) -> anyhow::Result<T> {
    Ok(serde_json::from_reader(
        response.data.into_reader_and_size().0,
    )?)
}
