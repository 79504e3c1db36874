//! Job orchestration: cache lookup → admission → slot → deadline-wrapped
//! scrape → classification → cache write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::models::job::{JobState, VerificationJob};
use crate::models::verification::{
    QueueSnapshot, RejectionReason, VerificationKey, VerificationResult,
};
use crate::services::cache::ResultCache;
use crate::services::classifier;
use crate::services::pool::{Admission, SlotPool};
use crate::services::scraper::{RegistryRecord, RegistryScraper, ScrapeError};
use crate::services::supervisor::{self, JobOutcome};

#[derive(Debug)]
pub struct VerifyOutcome {
    pub result: VerificationResult,
    pub cached: bool,
    pub took_ms: u64,
    pub queue: QueueSnapshot,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification queue is full")]
    QueueFull,

    #[error("verification timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),
}

/// Owns every piece of mutable verification state: the admission
/// gate/worker pool, the result cache and the scraper handle. Constructed
/// once at startup and shared behind an `Arc`; there are no module-level
/// globals, so tests build fresh instances freely.
pub struct Orchestrator {
    scraper: Arc<dyn RegistryScraper>,
    pool: SlotPool,
    cache: ResultCache,
    hard_timeout: Duration,
}

impl Orchestrator {
    pub fn new(scraper: Arc<dyn RegistryScraper>, config: &AppConfig) -> Self {
        Self {
            scraper,
            pool: SlotPool::new(config.max_concurrent_scrapes, config.max_queue_size),
            cache: ResultCache::new(Duration::from_millis(config.cache_ttl_ms)),
            hard_timeout: Duration::from_millis(config.hard_timeout_ms),
        }
    }

    /// Run one verification to completion: cache fast path, then a
    /// supervised scrape under a pool slot. Only authoritative outcomes
    /// reach the cache.
    pub async fn verify(&self, key: &VerificationKey) -> Result<VerifyOutcome, VerifyError> {
        let request_start = Instant::now();
        let cache_key = key.to_string();

        if let Some(result) = self.cache.get(&cache_key) {
            counter!("verification_cache_hits").increment(1);
            info!(key = %cache_key, "cache hit");
            return Ok(VerifyOutcome {
                result,
                cached: true,
                took_ms: request_start.elapsed().as_millis() as u64,
                queue: self.pool.snapshot(),
            });
        }

        let admission = match self.pool.try_acquire() {
            Ok(admission) => admission,
            Err(_) => {
                counter!("verification_jobs_rejected").increment(1);
                warn!(key = %cache_key, queue = ?self.pool.snapshot(), "admission rejected, queue full");
                return Err(VerifyError::QueueFull);
            }
        };

        let mut job = VerificationJob::new(key.clone());
        counter!("verification_jobs_total").increment(1);
        self.update_queue_gauge();

        let slot = match admission {
            Admission::Ready(guard) => guard,
            Admission::Queued(ticket) => {
                info!(job_id = %job.id, key = %cache_key, "job queued");
                ticket.slot().await
            }
        };

        job.start(self.hard_timeout);
        self.update_queue_gauge();
        info!(
            job_id = %job.id,
            key = %cache_key,
            queued_ms = job.queued_for().as_millis() as u64,
            "job started"
        );

        let outcome =
            supervisor::run_with_deadline(self.hard_timeout, self.scraper.scrape(&job.key)).await;

        drop(slot);
        self.update_queue_gauge();

        if let Some(started_at) = job.started_at {
            histogram!("verification_processing_seconds").record(started_at.elapsed().as_secs_f64());
        }

        match outcome {
            JobOutcome::Succeeded(record) => {
                job.finish(JobState::Succeeded);
                counter!("verification_jobs_completed").increment(1);
                let result = build_result(&job.key, record);
                self.cache.insert(&cache_key, result.clone());
                info!(
                    job_id = %job.id,
                    key = %cache_key,
                    found = result.found,
                    verified = result.verified,
                    "job succeeded"
                );
                Ok(VerifyOutcome {
                    result,
                    cached: false,
                    took_ms: request_start.elapsed().as_millis() as u64,
                    queue: self.pool.snapshot(),
                })
            }
            JobOutcome::Failed(err) => {
                job.finish(JobState::Failed);
                counter!("verification_jobs_failed").increment(1);
                warn!(job_id = %job.id, key = %cache_key, error = %err, "job failed");
                Err(VerifyError::Scrape(err))
            }
            JobOutcome::TimedOut => {
                job.finish(JobState::TimedOut);
                counter!("verification_jobs_timed_out").increment(1);
                let timeout_ms = self.hard_timeout.as_millis() as u64;
                warn!(job_id = %job.id, key = %cache_key, timeout_ms, "job timed out");
                Err(VerifyError::Timeout(timeout_ms))
            }
        }
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.pool.snapshot()
    }

    pub fn cache_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    fn update_queue_gauge(&self) {
        gauge!("verification_queue_depth").set(self.pool.snapshot().queued as f64);
    }
}

/// Turn a raw registry record into the immutable verification outcome,
/// applying the profession classification.
fn build_result(key: &VerificationKey, record: RegistryRecord) -> VerificationResult {
    let extracted_at = Utc::now();

    let full_name = record
        .basic_fields
        .iter()
        .find(|(k, v)| classifier::normalize(k).contains("NOMBRE") && !v.trim().is_empty())
        .map(|(_, v)| v.clone());

    if !record.found || full_name.is_none() || record.professions.is_empty() {
        return VerificationResult {
            found: false,
            verified: false,
            document: key.to_string(),
            full_name: None,
            professions: Vec::new(),
            postgraduates: Vec::new(),
            primary_profession: None,
            primary_license: None,
            specialty_display: None,
            normalized_profession: None,
            is_human_medical_profession: false,
            rejection_reason: Some(RejectionReason::NotRegistered),
            message: "Esta cédula no está registrada en el SACS como profesional de la salud"
                .to_string(),
            extracted_at,
        };
    }

    let primary = record.professions[0].clone();
    let normalized = classifier::normalize(&primary.profession);
    let is_veterinary = classifier::is_veterinary(&primary.profession);
    let is_human = classifier::is_human_medical(&primary.profession);

    let (rejection_reason, message) = if is_veterinary {
        (
            Some(RejectionReason::VeterinaryProfessional),
            "Esta cédula corresponde a un médico veterinario. Red-Salud es exclusivamente para \
             profesionales de salud humana."
                .to_string(),
        )
    } else if is_human {
        (
            None,
            "Verificación exitosa. Profesional de salud humana registrado en el SACS.".to_string(),
        )
    } else {
        (
            Some(RejectionReason::ProfessionNotEnabled),
            format!(
                "La profesión \"{}\" no está habilitada en Red-Salud. Solo se permiten \
                 profesionales de salud humana.",
                primary.profession
            ),
        )
    };

    let specialty = classifier::display_specialty(&record.professions, &record.postgraduates);

    VerificationResult {
        found: true,
        verified: is_human,
        document: key.to_string(),
        full_name,
        primary_profession: Some(primary.profession.clone()),
        primary_license: Some(primary.license.clone()),
        specialty_display: Some(specialty),
        normalized_profession: Some(normalized),
        is_human_medical_profession: is_human,
        professions: record.professions,
        postgraduates: record.postgraduates,
        rejection_reason,
        message,
        extracted_at,
    }
}
