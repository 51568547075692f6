use crate::channel::ChannelSubmitter;
use crate::config::{SubmitOptions, TargetTypes};
use crate::cursor::CursorGuard;
use crate::dao::{DaoRegistry, RecordDao};
use crate::error::SubmitError;
use crate::progress::make_submit_spinner;
use crate::query::QuerySpec;
use crate::record::{Pid, RecordId};
use crate::tx::{Propagation, TransactionManager, TxScope};
use indicatif::ProgressBar;
use std::sync::Arc;
use tracing::Dispatch;

pub const PATIENT: &str = "Patient";
pub const PRACTITIONER: &str = "Practitioner";

/// Resubmits stored records to the downstream channel, one page of identifiers at a time.
///
/// Single-threaded and synchronous: batches go out in cursor order and records in the
/// order the store loads them. Nothing is retried, deduplicated, or resumed; running the
/// same submit twice publishes the same records twice.
#[derive(Clone)]
pub struct Resubmitter {
    pub(crate) opts: SubmitOptions,
    registry: DaoRegistry,
    channel: Arc<dyn ChannelSubmitter>,
    tx: TxScope,
    dispatch: Option<Dispatch>,
}

impl Resubmitter {
    pub fn new(registry: DaoRegistry, channel: Arc<dyn ChannelSubmitter>) -> Self {
        Self {
            opts: SubmitOptions::default(),
            registry,
            channel,
            tx: TxScope::default(),
            dispatch: None,
        }
    }

    // -------- Builder methods --------
    pub fn options(mut self, opts: SubmitOptions) -> Self { self.opts = opts; self }
    pub fn types<I, S>(mut self, types: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> { self.opts = self.opts.with_types(types); self }
    pub fn page_size(mut self, n: usize) -> Self { self.opts = self.opts.with_page_size(n); self }
    pub fn propagation(mut self, p: Propagation) -> Self { self.opts = self.opts.with_propagation(p); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self { self.opts = self.opts.with_progress_label(label); self }

    /// Scope every submit in transactions from `manager`. Transactions bound what cursors
    /// can see; they never undo channel submissions.
    pub fn transactions(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.tx = TxScope::new(Some(manager));
        self
    }

    /// Route this instance's logs to `dispatch` instead of the process default.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn target_types(&self) -> &TargetTypes {
        &self.opts.types
    }

    fn logged<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.dispatch {
            Some(d) => tracing::dispatcher::with_default(d, f),
            None => f(),
        }
    }

    // -------- Operations --------

    /// Every allow-listed type, in allow-list order. The first failing type aborts the run.
    pub fn submit_all(&self, criteria: Option<&str>) -> Result<u64, SubmitError> {
        self.logged(|| {
            self.tx.run(Propagation::Required, || {
                let mut total = 0u64;
                for record_type in self.opts.types.iter() {
                    total += self.submit_type_inner(record_type, criteria)?;
                }
                tracing::info!("Submitted a total of {} resources across {} types.", total, self.opts.types.len());
                Ok(total)
            })
        })
    }

    pub fn submit_type(&self, record_type: &str, criteria: Option<&str>) -> Result<u64, SubmitError> {
        self.logged(|| self.submit_type_inner(record_type, criteria))
    }

    pub fn submit_patient_type(&self, criteria: Option<&str>) -> Result<u64, SubmitError> {
        self.submit_type(PATIENT, criteria)
    }

    pub fn submit_practitioner_type(&self, criteria: Option<&str>) -> Result<u64, SubmitError> {
        self.submit_type(PRACTITIONER, criteria)
    }

    /// Read one record directly and submit it. Returns 1.
    pub fn submit_one(&self, id: &RecordId) -> Result<u64, SubmitError> {
        self.logged(|| {
            self.validate_type(&id.record_type)?;
            let dao = self.dao_for(&id.record_type)?;
            self.tx.run(self.opts.propagation, || {
                let record = dao
                    .read(id)
                    .map_err(|source| SubmitError::Read { id: id.clone(), source })?
                    .ok_or_else(|| SubmitError::NotFound { id: id.clone() })?;
                self.channel.submit(&record).map_err(|source| SubmitError::Publish {
                    record_type: id.record_type.clone(),
                    published: 0,
                    source,
                })?;
                tracing::info!("Submitted {} to the channel.", id);
                Ok(1)
            })
        })
    }

    /// `Type/id` form of [`submit_one`](Self::submit_one).
    pub fn submit_one_str(&self, raw: &str) -> Result<u64, SubmitError> {
        let id = RecordId::parse(raw).ok_or_else(|| SubmitError::InvalidId { raw: raw.to_string() })?;
        self.submit_one(&id)
    }

    // -------- Internals --------

    fn validate_type(&self, record_type: &str) -> Result<(), SubmitError> {
        if self.opts.types.contains(record_type) {
            Ok(())
        } else {
            Err(SubmitError::Validation { record_type: record_type.to_string() })
        }
    }

    fn dao_for(&self, record_type: &str) -> Result<&Arc<dyn RecordDao>, SubmitError> {
        self.registry
            .get(record_type)
            .ok_or_else(|| SubmitError::UnknownType { record_type: record_type.to_string() })
    }

    fn submit_type_inner(&self, record_type: &str, criteria: Option<&str>) -> Result<u64, SubmitError> {
        match criteria {
            None => tracing::info!("Submitting all resources of type {} to MDM", record_type),
            Some(c) => tracing::info!("Submitting resources of type {} with criteria {} to MDM", record_type, c),
        }

        // Everything that can reject the request happens before the store is touched.
        self.validate_type(record_type)?;
        let spec = QuerySpec::compile(record_type, criteria, self.opts.page_size).map_err(|reason| {
            SubmitError::InvalidCriteria {
                record_type: record_type.to_string(),
                criteria: criteria.unwrap_or_default().to_string(),
                reason,
            }
        })?;
        let dao = self.dao_for(record_type)?;

        self.tx.run(self.opts.propagation, || self.submit_matching(dao.as_ref(), &spec))
    }

    fn submit_matching(&self, dao: &dyn RecordDao, spec: &QuerySpec) -> Result<u64, SubmitError> {
        let record_type = spec.record_type.as_str();
        let query_err = |published: u64| {
            move |source: anyhow::Error| SubmitError::Query { record_type: record_type.to_string(), published, source }
        };

        let mut cursor = CursorGuard::new(dao.search(spec).map_err(query_err(0))?);
        tracing::debug!(record_type, page_size = spec.page_size, "cursor opened");

        let pb = self.opts.progress.then(|| {
            let label = self.opts.progress_label.clone().unwrap_or_else(|| format!("Submitting {record_type}"));
            make_submit_spinner(&label)
        });

        let mut total = 0u64;
        while cursor.has_more() {
            let batch = cursor.next_batch(spec.page_size).map_err(query_err(total))?;
            if batch.is_empty() {
                break;
            }
            total += self.load_and_submit(dao, record_type, &batch, total, pb.as_ref())?;
        }
        cursor.close();
        tracing::debug!(record_type, advances = cursor.advances(), "cursor drained");

        if let Some(pb) = pb {
            pb.finish_with_message(format!("{record_type} done"));
        }
        tracing::info!("MDM Submit complete.  Submitted a total of {} resources.", total);
        Ok(total)
    }

    /// Resolve one batch and submit each record. Returns how many were submitted.
    fn load_and_submit(
        &self,
        dao: &dyn RecordDao,
        record_type: &str,
        pids: &[Pid],
        published: u64,
        pb: Option<&ProgressBar>,
    ) -> Result<u64, SubmitError> {
        let records = dao.load(pids).map_err(|source| SubmitError::Load {
            record_type: record_type.to_string(),
            published,
            source,
        })?;
        if records.len() < pids.len() {
            tracing::warn!(requested = pids.len(), resolved = records.len(), "some identifiers did not resolve; submitting the rest");
        }
        tracing::info!("Submitting {} resources to MDM", records.len());

        let mut sent = 0u64;
        for record in &records {
            self.channel.submit(record).map_err(|source| SubmitError::Publish {
                record_type: record_type.to_string(),
                published: published + sent,
                source,
            })?;
            sent += 1;
            if let Some(pb) = pb {
                pb.inc(1);
            }
        }
        Ok(sent)
    }
}
