use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{CallContext, ContextError};
use crate::error::{Code, Status, StoreError};
use crate::image_store::ImageStore;
use crate::model::Laptop;
use crate::proto::{
    CreateLaptopRequest, CreateLaptopResponse, SearchLaptopRequest, SearchLaptopResponse,
    UploadImageRequest, UploadImageResponse,
};
use crate::store::{LaptopSink, LaptopStore};

/// Upper bound on the bytes accepted by one image upload (1 MiB).
pub const MAX_IMAGE_SIZE: usize = 1 << 20;

/// Outbound half of a server-streaming call.
#[async_trait]
pub trait ResponseStream<T: Send + 'static>: Send {
    async fn send(&mut self, message: T) -> Result<(), Status>;
}

/// Inbound half of a client-streaming call. `Ok(None)` marks end of stream.
#[async_trait]
pub trait RequestStream<T: Send + 'static>: Send {
    async fn recv(&mut self) -> Result<Option<T>, Status>;
}

#[async_trait]
impl<T: Send + 'static> ResponseStream<T> for Vec<T> {
    async fn send(&mut self, message: T) -> Result<(), Status> {
        self.push(message);
        Ok(())
    }
}

/// Adapts an outbound stream to the store's search sink.
struct SearchForwarder<'a> {
    stream: &'a mut dyn ResponseStream<SearchLaptopResponse>,
    sent: usize,
}

#[async_trait]
impl LaptopSink for SearchForwarder<'_> {
    async fn found(&mut self, laptop: Laptop) -> Result<(), StoreError> {
        let id = laptop.id.clone();
        self.stream
        .send(SearchLaptopResponse { laptop })
        .await
        .map_err(|status| match status.code() {
            Code::Cancelled => StoreError::Cancelled,
            Code::DeadlineExceeded => StoreError::DeadlineExceeded,
            _ => StoreError::Stream(status.to_string()),
        })?;
        self.sent += 1;
        debug!(id = %id, "sent laptop to client");
        Ok(())
    }
}

/// The three catalog protocols on top of the record and image stores.
#[derive(Clone)]
pub struct LaptopService {
    laptop_store: Arc<dyn LaptopStore>,
    image_store: Arc<dyn ImageStore>,
}

impl LaptopService {
    pub fn new(laptop_store: Arc<dyn LaptopStore>, image_store: Arc<dyn ImageStore>) -> Self {
        Self { laptop_store, image_store }
    }

    pub fn laptop_store(&self) -> &Arc<dyn LaptopStore> {
        &self.laptop_store
    }

    pub fn image_store(&self) -> &Arc<dyn ImageStore> {
        &self.image_store
    }

    /// Unary create. Assigns a UUID when the request carries no id.
    pub async fn create_laptop(
        &self,
        ctx: &CallContext,
        request: CreateLaptopRequest,
    ) -> Result<CreateLaptopResponse, Status> {
        let mut laptop = request.laptop;
        info!(id = %laptop.id, "received create laptop request");

        if laptop.id.is_empty() {
            laptop.id = Uuid::new_v4().to_string();
        } else if let Err(e) = Uuid::parse_str(&laptop.id) {
            return Err(Status::invalid_argument(format!("laptop id is not a valid UUID: {}", e)));
        }

        check_context(ctx)?;

        // The write lock may be queued behind a slow search.
        let saved = ctx.bounded(self.laptop_store.save(&laptop)).await.map_err(context_status)?;
        match saved {
            Ok(()) => {
                info!(id = %laptop.id, "saved laptop");
                Ok(CreateLaptopResponse { id: laptop.id })
            }
            Err(StoreError::AlreadyExists) => Err(Status::already_exists(format!(
                "failed to save laptop: id {} already exists",
                laptop.id
            ))),
            Err(e) => Err(Status::internal(format!("failed to save laptop: {}", e))),
        }
    }

    /// Server-streaming search. Matches are written as they are found.
    pub async fn search_laptop(
        &self,
        ctx: &CallContext,
        request: SearchLaptopRequest,
        stream: &mut dyn ResponseStream<SearchLaptopResponse>,
    ) -> Result<(), Status> {
        let filter = request.filter;
        info!(?filter, "received search laptop request");
        filter.validate().map_err(Status::invalid_argument)?;

        let mut forwarder = SearchForwarder { stream, sent: 0 };
        let result = match ctx.bounded(self.laptop_store.search(&filter, ctx, &mut forwarder)).await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };
        let sent = forwarder.sent;

        match result {
            Ok(()) => {
                info!(sent, "search finished");
                Ok(())
            }
            Err(StoreError::Cancelled) => {
                warn!(sent, "search cancelled");
                Err(Status::cancelled("request is cancelled"))
            }
            Err(StoreError::DeadlineExceeded) => {
                warn!(sent, "search deadline exceeded");
                Err(Status::deadline_exceeded("deadline is exceeded"))
            }
            Err(e) => {
                // A dead peer surfaces as a write error; report why the call ended.
                check_context(ctx)?;
                Err(Status::internal(format!("error while searching for laptop: {}", e)))
            }
        }
    }

    /// Client-streaming upload: metadata, then chunks, then a single commit.
    pub async fn upload_image(
        &self,
        ctx: &CallContext,
        stream: &mut dyn RequestStream<UploadImageRequest>,
    ) -> Result<UploadImageResponse, Status> {
        let info = match stream.recv().await {
            Ok(Some(UploadImageRequest::Info(info))) => info,
            Ok(Some(UploadImageRequest::ChunkData(_))) => {
                return Err(Status::invalid_argument("first upload message must carry image info"));
            }
            Ok(None) => return Err(Status::invalid_argument("upload stream ended before image info")),
            Err(status) => {
                check_context(ctx)?;
                return Err(Status::unknown(format!("failed to read image info: {}", status.message)));
            }
        };
        info!(laptop_id = %info.laptop_id, image_type = ?info.image_type, "received upload image request");

        let owner = ctx.bounded(self.laptop_store.find_by_id(&info.laptop_id)).await.map_err(context_status)?;
        match owner {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(Status::invalid_argument(format!(
                    "laptop doesn't exist with id: {}",
                    info.laptop_id
                )));
            }
            Err(e) => return Err(Status::internal(format!("error while fetching laptop: {}", e))),
        }

        let mut image_data: Vec<u8> = Vec::new();
        loop {
            let request = match stream.recv().await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(status) => {
                    check_context(ctx)?;
                    return Err(Status::unknown(format!("failed to read chunk data: {}", status.message)));
                }
            };
            check_context(ctx)?;

            let chunk = match request {
                UploadImageRequest::ChunkData(chunk) => chunk,
                UploadImageRequest::Info(_) => {
                    return Err(Status::invalid_argument("image info may only be sent once"));
                }
            };

            let size = image_data.len() + chunk.len();
            if size > MAX_IMAGE_SIZE {
                warn!(laptop_id = %info.laptop_id, size, "image too large");
                return Err(Status::resource_exhausted(format!(
                    "image is too large: {} > {}",
                    size, MAX_IMAGE_SIZE
                )));
            }
            image_data.extend_from_slice(&chunk);
            debug!(chunk = chunk.len(), total = size, "received chunk");
        }

        let image_id = self
        .image_store
        .save(&info.laptop_id, info.image_type, &image_data)
        .await
        .map_err(|e| Status::internal(format!("cannot save image: {}", e)))?;

        info!(image_id = %image_id, size = image_data.len(), "saved image");
        Ok(UploadImageResponse { id: image_id, size: image_data.len() as u32 })
    }
}

fn check_context(ctx: &CallContext) -> Result<(), Status> {
    ctx.check().map_err(context_status)
}

fn context_status(e: ContextError) -> Status {
    warn!("{}", e);
    Status::from(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_store::DiskImageStore;
    use crate::model::{Filter, ImageType, Memory};
    use crate::proto::ImageInfo;
    use crate::sample;
    use crate::store::InMemoryLaptopStore;
    use std::collections::{HashSet, VecDeque};
    use std::time::{Duration, Instant};

    struct ScriptedUpload {
        messages: VecDeque<Result<UploadImageRequest, Status>>,
        on_recv: Option<(usize, CallContext)>,
        received: usize,
    }

    impl ScriptedUpload {
        fn new(messages: Vec<UploadImageRequest>) -> Self {
            Self {
                messages: messages.into_iter().map(Ok).collect(),
                on_recv: None,
                received: 0,
            }
        }
    }

    #[async_trait]
    impl RequestStream<UploadImageRequest> for ScriptedUpload {
        async fn recv(&mut self) -> Result<Option<UploadImageRequest>, Status> {
            self.received += 1;
            if let Some((at, ctx)) = &self.on_recv {
                if *at == self.received {
                    ctx.cancel();
                }
            }
            self.messages.pop_front().transpose()
        }
    }

    struct FailingStream;

    #[async_trait]
    impl ResponseStream<SearchLaptopResponse> for FailingStream {
        async fn send(&mut self, _message: SearchLaptopResponse) -> Result<(), Status> {
            Err(Status::unavailable("broken pipe"))
        }
    }

    struct StalledStream;

    #[async_trait]
    impl ResponseStream<SearchLaptopResponse> for StalledStream {
        async fn send(&mut self, _message: SearchLaptopResponse) -> Result<(), Status> {
            std::future::pending().await
        }
    }

    fn service_with(dir: &std::path::Path) -> (LaptopService, Arc<InMemoryLaptopStore>, Arc<DiskImageStore>) {
        let laptops = Arc::new(InMemoryLaptopStore::new());
        let images = Arc::new(DiskImageStore::new(dir));
        (LaptopService::new(laptops.clone(), images.clone()), laptops, images)
    }

    fn info(laptop_id: &str) -> UploadImageRequest {
        UploadImageRequest::Info(ImageInfo {
            laptop_id: laptop_id.to_string(),
            image_type: ImageType::Jpg,
        })
    }

    #[tokio::test]
    async fn create_assigns_uuid_when_id_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());

        let mut laptop = sample::new_laptop();
        laptop.id = String::new();
        let response = service
        .create_laptop(&CallContext::new(), CreateLaptopRequest { laptop })
        .await
        .unwrap();
        assert!(Uuid::parse_str(&response.id).is_ok());
        assert!(laptops.find_by_id(&response.id).await.is_ok());

        let mut duplicate = sample::new_laptop();
        duplicate.id = response.id.clone();
        let err = service
        .create_laptop(&CallContext::new(), CreateLaptopRequest { laptop: duplicate })
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::AlreadyExists);
    }

    #[tokio::test]
    async fn create_keeps_a_valid_client_id() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _, _) = service_with(dir.path());

        let laptop = sample::new_laptop();
        let id = laptop.id.clone();
        let response = service
        .create_laptop(&CallContext::new(), CreateLaptopRequest { laptop })
        .await
        .unwrap();
        assert_eq!(response.id, id);
    }

    #[tokio::test]
    async fn create_rejects_malformed_id() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());

        let mut laptop = sample::new_laptop();
        laptop.id = "abc".to_string();
        let err = service
        .create_laptop(&CallContext::new(), CreateLaptopRequest { laptop })
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(laptops.count().await, 0);
    }

    #[tokio::test]
    async fn create_checks_context_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());

        let cancelled = CallContext::new();
        cancelled.cancel();
        let err = service
        .create_laptop(&cancelled, CreateLaptopRequest { laptop: sample::new_laptop() })
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);

        let expired = CallContext::with_deadline(Instant::now() - Duration::from_millis(1));
        let err = service
        .create_laptop(&expired, CreateLaptopRequest { laptop: sample::new_laptop() })
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(laptops.count().await, 0);
    }

    #[tokio::test]
    async fn search_streams_only_qualified_laptops() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());

        let mut expected = HashSet::new();
        for i in 0..6 {
            let mut laptop = sample::new_laptop();
            match i {
                0 => laptop.price_usd = 2500.0,
                1 => laptop.cpu.number_cores = 2,
                2 => laptop.cpu.min_ghz = 2.0,
                3 => laptop.ram = Memory::gigabytes(4),
                _ => {
                    laptop.price_usd = 1999.0;
                    laptop.cpu.number_cores = 4 + i as u32;
                    laptop.cpu.min_ghz = 2.5;
                    laptop.ram = Memory::gigabytes(16);
                    expected.insert(laptop.id.clone());
                }
            }
            laptops.save(&laptop).await.unwrap();
        }

        let request = SearchLaptopRequest {
            filter: Filter {
                max_price_usd: 2000.0,
                min_cpu_cores: 4,
                min_cpu_ghz: 2.2,
                min_ram: Some(Memory::gigabytes(16)),
            },
        };
        let mut responses: Vec<SearchLaptopResponse> = Vec::new();
        service.search_laptop(&CallContext::new(), request, &mut responses).await.unwrap();

        assert_eq!(responses.len(), 2);
        let ids: HashSet<String> = responses.into_iter().map(|r| r.laptop.id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn search_maps_failures_to_status() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());
        laptops.save(&sample::new_laptop()).await.unwrap();

        let err = service
        .search_laptop(&CallContext::new(), SearchLaptopRequest::default(), &mut FailingStream)
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::Internal);

        let ctx = CallContext::new();
        ctx.cancel();
        let mut out: Vec<SearchLaptopResponse> = Vec::new();
        let err = service
        .search_laptop(&ctx, SearchLaptopRequest::default(), &mut out)
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);

        let bad = SearchLaptopRequest {
            filter: Filter { max_price_usd: -5.0, ..Default::default() },
        };
        let err = service
        .search_laptop(&CallContext::new(), bad, &mut out)
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn upload_assembles_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, images) = service_with(dir.path());
        let laptop = sample::new_laptop();
        laptops.save(&laptop).await.unwrap();

        let mut stream = ScriptedUpload::new(vec![
            info(&laptop.id),
            UploadImageRequest::ChunkData(vec![1u8; 600]),
            UploadImageRequest::ChunkData(vec![2u8; 600]),
        ]);
        let response = service.upload_image(&CallContext::new(), &mut stream).await.unwrap();
        assert_eq!(response.size, 1200);
        assert!(!response.id.is_empty());

        let stored = images.find(&response.id).await.unwrap();
        assert_eq!(stored.laptop_id, laptop.id);
        let bytes = std::fs::read(&stored.path).unwrap();
        assert_eq!(bytes.len(), 1200);
        assert!(bytes[..600].iter().all(|b| *b == 1));
        assert!(bytes[600..].iter().all(|b| *b == 2));
    }

    #[tokio::test]
    async fn upload_rejects_chunk_before_info() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _, images) = service_with(dir.path());

        let mut stream = ScriptedUpload::new(vec![UploadImageRequest::ChunkData(vec![0u8; 10])]);
        let err = service.upload_image(&CallContext::new(), &mut stream).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(stream.received, 1);
        assert_eq!(images.count().await, 0);
    }

    #[tokio::test]
    async fn upload_to_unknown_laptop_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _, _) = service_with(dir.path());

        let mut stream = ScriptedUpload::new(vec![
            info(&Uuid::new_v4().to_string()),
            UploadImageRequest::ChunkData(vec![0u8; 10]),
        ]);
        let err = service.upload_image(&CallContext::new(), &mut stream).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn upload_over_limit_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, images) = service_with(dir.path());
        let laptop = sample::new_laptop();
        laptops.save(&laptop).await.unwrap();

        let mut messages = vec![info(&laptop.id)];
        for _ in 0..16 {
            messages.push(UploadImageRequest::ChunkData(vec![0u8; 64 * 1024]));
        }
        // Exactly at the limit so far; one more byte tips it over.
        messages.push(UploadImageRequest::ChunkData(vec![0u8; 1]));

        let mut stream = ScriptedUpload::new(messages);
        let err = service.upload_image(&CallContext::new(), &mut stream).await.unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert_eq!(images.count().await, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn upload_at_exact_limit_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());
        let laptop = sample::new_laptop();
        laptops.save(&laptop).await.unwrap();

        let mut stream = ScriptedUpload::new(vec![
            info(&laptop.id),
            UploadImageRequest::ChunkData(vec![0u8; MAX_IMAGE_SIZE]),
        ]);
        let response = service.upload_image(&CallContext::new(), &mut stream).await.unwrap();
        assert_eq!(response.size as usize, MAX_IMAGE_SIZE);
    }

    #[tokio::test]
    async fn upload_stops_when_cancelled_mid_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, images) = service_with(dir.path());
        let laptop = sample::new_laptop();
        laptops.save(&laptop).await.unwrap();

        let ctx = CallContext::new();
        let mut stream = ScriptedUpload::new(vec![
            info(&laptop.id),
            UploadImageRequest::ChunkData(vec![0u8; 10]),
            UploadImageRequest::ChunkData(vec![0u8; 10]),
            UploadImageRequest::ChunkData(vec![0u8; 10]),
        ]);
        stream.on_recv = Some((3, ctx.clone()));

        let err = service.upload_image(&ctx, &mut stream).await.unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
        assert_eq!(stream.received, 3);
        assert_eq!(images.count().await, 0);
    }

    #[tokio::test]
    async fn upload_receive_error_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());
        let laptop = sample::new_laptop();
        laptops.save(&laptop).await.unwrap();

        let mut stream = ScriptedUpload::new(vec![info(&laptop.id)]);
        stream.messages.push_back(Err(Status::unavailable("connection reset")));

        let err = service.upload_image(&CallContext::new(), &mut stream).await.unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
    }

    #[tokio::test]
    async fn stalled_search_releases_the_store_at_its_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let (service, laptops, _) = service_with(dir.path());
        laptops.save(&sample::new_laptop()).await.unwrap();
        let service = Arc::new(service);

        let searcher = service.clone();
        let search = tokio::spawn(async move {
            let ctx = CallContext::with_timeout(Duration::from_millis(200));
            searcher.search_laptop(&ctx, SearchLaptopRequest::default(), &mut StalledStream).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Queued behind the stalled search's read lock.
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        let err = service
        .create_laptop(&ctx, CreateLaptopRequest { laptop: sample::new_laptop() })
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);

        let err = search.await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);

        let ctx = CallContext::with_timeout(Duration::from_secs(1));
        service
        .create_laptop(&ctx, CreateLaptopRequest { laptop: sample::new_laptop() })
        .await
        .unwrap();
        assert_eq!(laptops.count().await, 2);
    }
}
