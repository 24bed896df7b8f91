//! Upload analysis and question answering.
//!
//! `AnalysisService` is the only caller of the result cache. A fresh upload
//! goes through storage, parsing and summarisation; identical bytes within the
//! TTL are answered from the file namespace, and distinct files that parse to
//! the same building share one entry in the analysis namespace.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::ports::{
    AnalysisStore, BuildingAnalyst, BuildingParser, InferenceError, NewAnalysis, NewQuestion,
    ParseError, StoreError,
};
use crate::cache::{CachedFile, Fingerprint, InFlight, ResultCache, hash_bytes};
use crate::domain::building::BuildingRecord;
use crate::infra::uploads::{UploadStorage, UploadStorageError};
use crate::util::bytes::{format_limit, format_megabytes};

const MODEL_EXTENSION: &str = ".ifc";
const DEFAULT_USER: &str = "anonymous";
const MAX_HISTORY_PAGE: usize = 200;
const QA_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("only .ifc files are accepted (got `{filename}`)")]
    InvalidFileType { filename: String },
    #[error("uploaded file is empty")]
    EmptyUpload,
    #[error("file too large: maximum size is {}, received {}", format_limit(*.limit), format_megabytes(*.size))]
    FileTooLarge { size: u64, limit: u64 },
    #[error("question cannot be empty")]
    EmptyQuestion,
    #[error("no building loaded; upload an IFC file first")]
    NoBuildingLoaded,
    #[error("persistence is not configured")]
    PersistenceUnavailable,
    #[error("analysis {id} not found")]
    NotFound { id: Uuid },
    #[error("failed to store upload")]
    Upload(#[from] UploadStorageError),
    #[error("failed to parse model")]
    Parse(#[from] ParseError),
    #[error("analysis could not be generated")]
    Inference(#[from] InferenceError),
    #[error("persistence request failed")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Bytes,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis_id: Option<Uuid>,
    pub file: Arc<CachedFile>,
    pub cached: bool,
    pub file_size: u64,
    pub processing_time: Duration,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub question: String,
    pub answer: String,
    pub analysis_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct AnalysisDetail {
    pub analysis: Value,
    pub qa_history: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalystStatus<'a> {
    pub configured: bool,
    pub model: &'a str,
}

/// Building most recently analysed in this process; the target of questions.
#[derive(Debug, Clone)]
pub struct CurrentBuilding {
    pub file: Arc<CachedFile>,
    pub analysis_id: Option<Uuid>,
}

#[derive(Debug, Default)]
pub struct SessionSlot {
    current: RwLock<Option<CurrentBuilding>>,
}

impl SessionSlot {
    pub fn replace(&self, file: Arc<CachedFile>, analysis_id: Option<Uuid>) {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(CurrentBuilding { file, analysis_id });
    }

    pub fn current(&self) -> Option<CurrentBuilding> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

pub struct AnalysisService {
    cache: Arc<ResultCache>,
    flights: Option<InFlight>,
    parser: Arc<dyn BuildingParser>,
    analyst: Arc<dyn BuildingAnalyst>,
    store: Option<Arc<dyn AnalysisStore>>,
    uploads: Arc<UploadStorage>,
    session: SessionSlot,
    max_file_bytes: u64,
}

impl AnalysisService {
    pub fn new(
        cache: Arc<ResultCache>,
        parser: Arc<dyn BuildingParser>,
        analyst: Arc<dyn BuildingAnalyst>,
        uploads: Arc<UploadStorage>,
        max_file_bytes: u64,
    ) -> Self {
        let flights = cache.config().single_flight.then(InFlight::new);
        Self {
            cache,
            flights,
            parser,
            analyst,
            store: None,
            uploads,
            session: SessionSlot::default(),
            max_file_bytes,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn analyst_status(&self) -> AnalystStatus<'_> {
        AnalystStatus {
            configured: self.analyst.is_configured(),
            model: self.analyst.model(),
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn current_building(&self) -> Option<CurrentBuilding> {
        self.session.current()
    }

    pub async fn analyze_upload(
        &self,
        request: UploadRequest,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let started = Instant::now();
        let UploadRequest {
            filename,
            bytes,
            user_id,
        } = request;

        if !filename.to_ascii_lowercase().ends_with(MODEL_EXTENSION) {
            return Err(AnalysisError::InvalidFileType { filename });
        }
        let file_size = bytes.len() as u64;
        if file_size == 0 {
            return Err(AnalysisError::EmptyUpload);
        }
        if file_size > self.max_file_bytes {
            return Err(AnalysisError::FileTooLarge {
                size: file_size,
                limit: self.max_file_bytes,
            });
        }

        let fingerprint = hash_bytes(&bytes);
        if let Some(hit) = self.cached_file(&fingerprint, &filename, file_size, started) {
            return Ok(hit);
        }

        let _flight = match &self.flights {
            Some(flights) => {
                let guard = flights.acquire(fingerprint).await;
                if let Some(hit) = self.cached_file(&fingerprint, &filename, file_size, started) {
                    return Ok(hit);
                }
                Some(guard)
            }
            None => None,
        };

        let stored = self.uploads.store(&filename, &bytes).await?;
        debug!(
            target = "bimvision::analysis",
            filename = %filename,
            stored_path = %stored.stored_path,
            size = %format_megabytes(file_size),
            "upload stored"
        );

        let parsed = self.parser.parse(&stored.absolute_path).await;
        if let Err(err) = self.uploads.release(&stored).await {
            warn!(
                target = "bimvision::analysis",
                stored_path = %stored.stored_path,
                error = %err,
                "failed to remove parsed upload"
            );
        }
        let record = parsed?.with_source_file(stored.stored_path.clone());

        let analysis = self.summarize(&record).await?;
        let file = self
            .cache
            .put_file(fingerprint, CachedFile { record, analysis });
        let processing_time = started.elapsed();

        let analysis_id = self
            .persist_analysis(&filename, &file, user_id, processing_time, file_size)
            .await;
        self.session.replace(Arc::clone(&file), analysis_id);

        info!(
            target = "bimvision::analysis",
            filename = %filename,
            key = %fingerprint.short(),
            analysis_id = ?analysis_id,
            elapsed_ms = processing_time.as_millis() as u64,
            "model analysed"
        );

        Ok(AnalysisOutcome {
            analysis_id,
            file,
            cached: false,
            file_size,
            processing_time,
            fingerprint,
        })
    }

    fn cached_file(
        &self,
        fingerprint: &Fingerprint,
        filename: &str,
        file_size: u64,
        started: Instant,
    ) -> Option<AnalysisOutcome> {
        let file = self.cache.get_file(fingerprint)?;
        self.session.replace(Arc::clone(&file), None);
        info!(
            target = "bimvision::analysis",
            filename = %filename,
            key = %fingerprint.short(),
            "served upload from cache"
        );
        Some(AnalysisOutcome {
            analysis_id: None,
            file,
            cached: true,
            file_size,
            processing_time: started.elapsed(),
            fingerprint: *fingerprint,
        })
    }

    /// Analysis text for `record`, reusing any fresh result for an equal record.
    async fn summarize(&self, record: &BuildingRecord) -> Result<Arc<str>, InferenceError> {
        let signature = record.analysis_signature();
        if let Some(text) = self.cache.get_analysis(&signature) {
            return Ok(text);
        }

        let text: Arc<str> = self.analyst.summarize(record).await?.into();
        self.cache.put_analysis(signature, Arc::clone(&text));
        Ok(text)
    }

    async fn persist_analysis(
        &self,
        filename: &str,
        file: &CachedFile,
        user_id: Option<String>,
        processing_time: Duration,
        file_size: u64,
    ) -> Option<Uuid> {
        let store = self.store.as_ref()?;
        let new = NewAnalysis {
            filename: filename.to_string(),
            record: file.record.clone(),
            analysis: file.analysis.to_string(),
            user_id: user_id.unwrap_or_else(|| DEFAULT_USER.to_string()),
            processing_time,
            file_size,
        };

        match store.store_analysis(&new).await {
            Ok(id) => Some(id),
            Err(err) => {
                warn!(
                    target = "bimvision::analysis",
                    filename = %filename,
                    error = %err,
                    "failed to persist analysis"
                );
                None
            }
        }
    }

    /// Answer a question about the current building. Answers are never cached.
    pub async fn answer_question(
        &self,
        question: &str,
        analysis_id: Option<Uuid>,
        user_id: Option<String>,
    ) -> Result<AnswerOutcome, AnalysisError> {
        let current = self.session.current().ok_or(AnalysisError::NoBuildingLoaded)?;
        if question.trim().is_empty() {
            return Err(AnalysisError::EmptyQuestion);
        }

        let answer = self.analyst.answer(&current.file.record, question).await?;
        let analysis_id = analysis_id.or(current.analysis_id);

        if let (Some(store), Some(id)) = (&self.store, analysis_id) {
            let qa = NewQuestion {
                analysis_id: id,
                user_id: user_id.unwrap_or_else(|| DEFAULT_USER.to_string()),
                question: question.to_string(),
                answer: answer.clone(),
            };
            if let Err(err) = store.store_qa(&qa).await {
                warn!(
                    target = "bimvision::analysis",
                    analysis_id = %id,
                    error = %err,
                    "failed to persist question"
                );
            }
        }

        Ok(AnswerOutcome {
            question: question.to_string(),
            answer,
            analysis_id,
        })
    }

    fn store(&self) -> Result<&Arc<dyn AnalysisStore>, AnalysisError> {
        self.store.as_ref().ok_or(AnalysisError::PersistenceUnavailable)
    }

    pub async fn history(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Value>, AnalysisError> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        Ok(self
            .store()?
            .list_user_analyses(user_id, limit, offset)
            .await?)
    }

    pub async fn analysis_detail(&self, id: Uuid) -> Result<AnalysisDetail, AnalysisError> {
        let store = self.store()?;
        let analysis = store
            .find_analysis(id)
            .await?
            .ok_or(AnalysisError::NotFound { id })?;
        let qa_history = store.qa_history(id, QA_HISTORY_LIMIT).await?;
        Ok(AnalysisDetail {
            analysis,
            qa_history,
        })
    }

    pub async fn delete_analysis(&self, id: Uuid) -> Result<(), AnalysisError> {
        if self.store()?.delete_analysis(id).await? {
            Ok(())
        } else {
            Err(AnalysisError::NotFound { id })
        }
    }

    pub async fn user_statistics(&self, user_id: &str) -> Result<Option<Value>, AnalysisError> {
        Ok(self.store()?.user_statistics(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::CacheConfig;
    use crate::domain::building::{ElementCounts, ElementKind, ProjectInfo};

    struct CountingParser {
        calls: AtomicUsize,
        walls: u64,
        delay: Duration,
    }

    #[async_trait]
    impl BuildingParser for CountingParser {
        async fn parse(&self, _path: &Path) -> Result<BuildingRecord, ParseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(BuildingRecord::assemble(
                ProjectInfo::default().with_project(Some("Tower".into()), None),
                ElementCounts::default().with(ElementKind::Wall, self.walls),
                vec!["Concrete".into()],
                Vec::new(),
                Some("IFC4".into()),
            ))
        }
    }

    #[derive(Default)]
    struct ScriptedAnalyst {
        summaries: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BuildingAnalyst for ScriptedAnalyst {
        fn model(&self) -> &str {
            "test-model"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn summarize(&self, record: &BuildingRecord) -> Result<String, InferenceError> {
            if self.fail {
                return Err(InferenceError::RateLimited { retry_after: None });
            }
            let n = self.summaries.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "summary {n} of {} walls",
                record.element_counts.walls
            ))
        }

        async fn answer(
            &self,
            record: &BuildingRecord,
            question: &str,
        ) -> Result<String, InferenceError> {
            Ok(format!("{}: {question}", record.project_info.project_name))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        questions: Mutex<Vec<NewQuestion>>,
    }

    #[async_trait]
    impl AnalysisStore for MemoryStore {
        async fn store_analysis(&self, _analysis: &NewAnalysis) -> Result<Uuid, StoreError> {
            Ok(Uuid::new_v4())
        }

        async fn store_qa(&self, qa: &NewQuestion) -> Result<(), StoreError> {
            self.questions
                .lock()
                .expect("questions lock")
                .push(qa.clone());
            Ok(())
        }

        async fn list_user_analyses(
            &self,
            _user_id: &str,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<Value>, StoreError> {
            Ok(Vec::new())
        }

        async fn find_analysis(&self, _id: Uuid) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }

        async fn qa_history(
            &self,
            _analysis_id: Uuid,
            _limit: usize,
        ) -> Result<Vec<Value>, StoreError> {
            Ok(Vec::new())
        }

        async fn delete_analysis(&self, _id: Uuid) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn user_statistics(&self, _user_id: &str) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }
    }

    struct Harness {
        service: AnalysisService,
        parser: Arc<CountingParser>,
        analyst: Arc<ScriptedAnalyst>,
        _dir: tempfile::TempDir,
    }

    fn harness(analyst: ScriptedAnalyst, max_file_bytes: u64) -> Harness {
        harness_with(analyst, max_file_bytes, CacheConfig::default(), Duration::ZERO)
    }

    fn harness_with(
        analyst: ScriptedAnalyst,
        max_file_bytes: u64,
        config: CacheConfig,
        parse_delay: Duration,
    ) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let uploads =
            Arc::new(UploadStorage::new(dir.path().to_path_buf(), false).expect("uploads"));
        let parser = Arc::new(CountingParser {
            calls: AtomicUsize::new(0),
            walls: 4,
            delay: parse_delay,
        });
        let analyst = Arc::new(analyst);
        let cache = Arc::new(ResultCache::new(config));
        let service = AnalysisService::new(
            cache,
            parser.clone(),
            analyst.clone(),
            uploads,
            max_file_bytes,
        );
        Harness {
            service,
            parser,
            analyst,
            _dir: dir,
        }
    }

    fn upload(name: &str, body: &'static [u8]) -> UploadRequest {
        UploadRequest {
            filename: name.to_string(),
            bytes: Bytes::from_static(body),
            user_id: None,
        }
    }

    #[tokio::test]
    async fn identical_bytes_are_served_from_cache() {
        let h = harness(ScriptedAnalyst::default(), 1024);

        let first = h
            .service
            .analyze_upload(upload("a.ifc", b"model-a"))
            .await
            .expect("first upload");
        assert!(!first.cached);

        let second = h
            .service
            .analyze_upload(upload("renamed.IFC", b"model-a"))
            .await
            .expect("second upload");
        assert!(second.cached);
        assert_eq!(second.analysis_id, None);
        assert_eq!(second.file.analysis, first.file.analysis);
        assert_eq!(h.parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.analyst.summaries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_flight_coalesces_concurrent_misses() {
        let config = CacheConfig {
            single_flight: true,
            ..CacheConfig::default()
        };
        let h = harness_with(
            ScriptedAnalyst::default(),
            1024,
            config,
            Duration::from_millis(50),
        );
        let service = Arc::new(h.service);

        let tasks: Vec<_> = (0..6)
            .map(|n| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .analyze_upload(upload(&format!("copy-{n}.ifc"), b"same-model"))
                        .await
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.expect("task").expect("upload"));
        }

        assert_eq!(h.parser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.analyst.summaries.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|outcome| !outcome.cached).count(), 1);
        let analysis = &outcomes[0].file.analysis;
        assert!(outcomes.iter().all(|outcome| &outcome.file.analysis == analysis));
        assert_eq!(service.cache().stats().file_count, 1);
    }

    #[tokio::test]
    async fn equal_records_share_one_analysis() {
        let h = harness(ScriptedAnalyst::default(), 1024);

        h.service
            .analyze_upload(upload("a.ifc", b"model-a"))
            .await
            .expect("first upload");
        let other = h
            .service
            .analyze_upload(upload("b.ifc", b"model-b"))
            .await
            .expect("second upload");

        assert!(!other.cached);
        assert_eq!(h.parser.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.analyst.summaries.load(Ordering::SeqCst), 1);
        let stats = h.service.cache().stats();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.analysis_count, 1);
    }

    #[tokio::test]
    async fn uploads_are_validated_before_hashing() {
        let h = harness(ScriptedAnalyst::default(), 4);

        assert!(matches!(
            h.service.analyze_upload(upload("plan.dwg", b"x")).await,
            Err(AnalysisError::InvalidFileType { .. })
        ));
        assert!(matches!(
            h.service.analyze_upload(upload("a.ifc", b"")).await,
            Err(AnalysisError::EmptyUpload)
        ));
        assert!(matches!(
            h.service.analyze_upload(upload("a.ifc", b"too long")).await,
            Err(AnalysisError::FileTooLarge { size: 8, limit: 4 })
        ));
        assert_eq!(h.parser.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inference_failures_are_not_cached() {
        let h = harness(
            ScriptedAnalyst {
                fail: true,
                ..ScriptedAnalyst::default()
            },
            1024,
        );

        let result = h.service.analyze_upload(upload("a.ifc", b"model")).await;
        assert!(matches!(result, Err(AnalysisError::Inference(_))));
        let stats = h.service.cache().stats();
        assert_eq!(stats.file_count, 0);
        assert_eq!(stats.analysis_count, 0);
        assert!(h.service.current_building().is_none());
    }

    #[tokio::test]
    async fn questions_need_a_building_and_text() {
        let h = harness(ScriptedAnalyst::default(), 1024);

        assert!(matches!(
            h.service.answer_question("How many walls?", None, None).await,
            Err(AnalysisError::NoBuildingLoaded)
        ));

        h.service
            .analyze_upload(upload("a.ifc", b"model"))
            .await
            .expect("upload");
        assert!(matches!(
            h.service.answer_question("   ", None, None).await,
            Err(AnalysisError::EmptyQuestion)
        ));

        let answer = h
            .service
            .answer_question("How many walls?", None, None)
            .await
            .expect("answer");
        assert_eq!(answer.answer, "Tower: How many walls?");
        assert_eq!(answer.analysis_id, None);
    }

    #[tokio::test]
    async fn persisted_uploads_link_questions() {
        let store = Arc::new(MemoryStore::default());
        let h = harness(ScriptedAnalyst::default(), 1024);
        let service = h.service.with_store(store.clone());

        let outcome = service
            .analyze_upload(upload("a.ifc", b"model"))
            .await
            .expect("upload");
        let id = outcome.analysis_id.expect("persisted id");

        let answer = service
            .answer_question("Cost?", None, Some("user-1".into()))
            .await
            .expect("answer");
        assert_eq!(answer.analysis_id, Some(id));

        let questions = store.questions.lock().expect("questions lock");
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].analysis_id, id);
        assert_eq!(questions[0].user_id, "user-1");
    }

    #[tokio::test]
    async fn history_requires_persistence() {
        let h = harness(ScriptedAnalyst::default(), 1024);
        assert!(matches!(
            h.service.history("anonymous", 50, 0).await,
            Err(AnalysisError::PersistenceUnavailable)
        ));

        let service = h.service.with_store(Arc::new(MemoryStore::default()));
        let id = Uuid::new_v4();
        assert!(matches!(
            service.analysis_detail(id).await,
            Err(AnalysisError::NotFound { id: missing }) if missing == id
        ));
        assert!(matches!(
            service.delete_analysis(id).await,
            Err(AnalysisError::NotFound { .. })
        ));
    }

    #[test]
    fn too_large_message_reports_both_sizes() {
        let err = AnalysisError::FileTooLarge {
            size: 600 * 1024 * 1024,
            limit: 500 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "file too large: maximum size is 500 MB, received 600.00 MB"
        );
    }
}
