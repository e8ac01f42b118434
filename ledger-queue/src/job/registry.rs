use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::{codec::Envelope, Job, JobError, QueueError, QueueResult};

/// Owned handler future, ready to be spawned by the worker
pub type BoxJobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send + 'static>>;

/// Type-erased job handler for runtime dispatch
pub trait JobHandler<C>: Send + Sync {
    /// Get the job type this handler processes
    fn job_type(&self) -> &str;

    /// Rebuild the job from the envelope and bind it to the context.
    ///
    /// Fails with a decode error when the arguments do not fit the job.
    fn prepare(&self, envelope: &Envelope, ctx: C) -> QueueResult<BoxJobFuture>;
}

/// Handler for a typed [`Job`]
struct ConcreteJobHandler<J: Job> {
    _phantom: PhantomData<fn() -> J>,
}

impl<J: Job> ConcreteJobHandler<J> {
    fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<J: Job> JobHandler<J::Context> for ConcreteJobHandler<J> {
    fn job_type(&self) -> &str {
        J::JOB_TYPE
    }

    fn prepare(&self, envelope: &Envelope, ctx: J::Context) -> QueueResult<BoxJobFuture> {
        let job: J = envelope.args()?;
        Ok(Box::pin(async move { job.handle(ctx).await }))
    }
}

/// Handler backed by a plain async function over the raw arguments
struct FnJobHandler<F> {
    job_type: String,
    f: F,
}

impl<C, F, Fut> JobHandler<C> for FnJobHandler<F>
where
    F: Fn(serde_json::Value, C) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn prepare(&self, envelope: &Envelope, ctx: C) -> QueueResult<BoxJobFuture> {
        Ok(Box::pin((self.f)(envelope.data.clone(), ctx)))
    }
}

/// Registry mapping handler identifiers to the factories that rebuild them.
///
/// Built once at start-up and handed to the worker.
pub struct JobRegistry<C> {
    handlers: HashMap<String, Arc<dyn JobHandler<C>>>,
}

impl<C: Clone + Send + Sync + 'static> JobRegistry<C> {
    /// Create a new job registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a job type
    pub fn register<J>(&mut self) -> QueueResult<()>
    where
        J: Job<Context = C>,
    {
        self.insert(Arc::new(ConcreteJobHandler::<J>::new()))
    }

    /// Register an async function under a handler identifier
    pub fn register_fn<F, Fut>(&mut self, job_type: impl Into<String>, f: F) -> QueueResult<()>
    where
        F: Fn(serde_json::Value, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.insert(Arc::new(FnJobHandler {
            job_type: job_type.into(),
            f,
        }))
    }

    /// Builder-style [`JobRegistry::register`]
    pub fn with<J>(mut self) -> QueueResult<Self>
    where
        J: Job<Context = C>,
    {
        self.register::<J>()?;
        Ok(self)
    }

    fn insert(&mut self, handler: Arc<dyn JobHandler<C>>) -> QueueResult<()> {
        let job_type = handler.job_type().to_string();

        if self.handlers.contains_key(&job_type) {
            return Err(QueueError::JobTypeAlreadyRegistered(job_type));
        }

        self.handlers.insert(job_type, handler);
        Ok(())
    }

    /// Resolve the handler named by the envelope and prepare its future
    pub fn prepare(&self, envelope: &Envelope, ctx: C) -> QueueResult<BoxJobFuture> {
        let handler = self.handlers
            .get(&envelope.job)
            .ok_or_else(|| QueueError::JobTypeNotRegistered(envelope.job.clone()))?;

        handler.prepare(envelope, ctx)
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Get all registered job types
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl<C: Clone + Send + Sync + 'static> Default for JobRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Outbox {
        sent: Arc<AtomicUsize>,
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct SendMail {
        to: String,
    }

    #[async_trait]
    impl Job for SendMail {
        type Context = Outbox;

        const JOB_TYPE: &'static str = "send_mail";

        async fn handle(&self, ctx: Self::Context) -> Result<(), JobError> {
            if !self.to.contains('@') {
                return Err(JobError::permanent(format!("invalid recipient: {}", self.to)));
            }
            ctx.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_job_registry() {
        let registry = JobRegistry::new().with::<SendMail>().unwrap();
        let outbox = Outbox::default();

        assert!(registry.is_registered("send_mail"));
        assert_eq!(registry.registered_types(), vec!["send_mail"]);

        let envelope = Envelope::for_job(&SendMail { to: "a@example.org".into() }).unwrap();
        registry.prepare(&envelope, outbox.clone()).unwrap().await.unwrap();
        assert_eq!(outbox.sent.load(Ordering::SeqCst), 1);

        let bad = Envelope::for_job(&SendMail { to: "nobody".into() }).unwrap();
        let result = registry.prepare(&bad, outbox).unwrap().await;
        assert!(matches!(result, Err(JobError::Permanent(_))));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = JobRegistry::<Outbox>::new();
        registry.register::<SendMail>().unwrap();

        let result = registry.register_fn("send_mail", |_, _| async { Ok(()) });
        assert!(matches!(result, Err(QueueError::JobTypeAlreadyRegistered(name)) if name == "send_mail"));
    }

    #[test]
    fn test_unregistered_job_type() {
        let registry = JobRegistry::<Outbox>::new();
        let envelope = Envelope::new("unknown_job", &serde_json::json!({})).unwrap();

        let result = registry.prepare(&envelope, Outbox::default());
        assert!(matches!(result, Err(QueueError::JobTypeNotRegistered(name)) if name == "unknown_job"));
    }

    #[test]
    fn test_mismatched_arguments_fail_to_prepare() {
        let registry = JobRegistry::new().with::<SendMail>().unwrap();
        let envelope = Envelope::new("send_mail", &serde_json::json!({ "recipient": 7 })).unwrap();

        let result = registry.prepare(&envelope, Outbox::default());
        assert!(matches!(result, Err(ref e) if e.is_decode_failure()));
    }

    #[tokio::test]
    async fn test_function_handlers_receive_raw_arguments() {
        let mut registry = JobRegistry::<Outbox>::new();
        registry
            .register_fn("count", |args, ctx: Outbox| async move {
                let n = args["n"].as_u64().unwrap_or(0) as usize;
                ctx.sent.fetch_add(n, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let outbox = Outbox::default();
        let envelope = Envelope::new("count", &serde_json::json!({ "n": 3 })).unwrap();
        registry.prepare(&envelope, outbox.clone()).unwrap().await.unwrap();

        assert_eq!(outbox.sent.load(Ordering::SeqCst), 3);
    }
}
