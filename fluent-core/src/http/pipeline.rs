use crate::common::Result;
use crate::http::request::{HttpRequest, HttpResponse};
use crate::http::transport::HttpClient;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A request/response interceptor in the [`HttpPipeline`].
///
/// A policy receives the request and the remainder of the chain. It may
/// mutate the request, call `next.run` zero or more times, and inspect or
/// replace the response.
///
/// # Examples
///
/// ```no_run
/// use fluent_core::common::Result;
/// use fluent_core::http::{HttpRequest, HttpResponse, Next, Policy};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct NoOp;
///
/// #[async_trait]
/// impl Policy for NoOp {
///     async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse> {
///         next.run(request).await
///     }
/// }
/// ```
#[async_trait]
pub trait Policy: Send + Sync + fmt::Debug {
    async fn send(&self, request: &mut HttpRequest, next: Next<'_>) -> Result<HttpResponse>;
}

/// The part of the pipeline after the current policy
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn HttpClient,
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining_policies", &self.policies.len())
            .finish()
    }
}

impl Next<'_> {
    /// Pass the request down the rest of the chain
    pub async fn run(&self, request: &mut HttpRequest) -> Result<HttpResponse> {
        match self.policies.split_first() {
            Some((policy, rest)) => {
                let next = Next {
                    policies: rest,
                    transport: self.transport,
                };
                policy.send(request, next).await
            }
            None => Ok(self.transport.send(request).await?),
        }
    }
}

/// Ordered policy chain in front of a transport. The first policy is outermost.
#[derive(Clone)]
pub struct HttpPipeline {
    policies: Vec<Arc<dyn Policy>>,
    transport: Arc<dyn HttpClient>,
}

impl fmt::Debug for HttpPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPipeline")
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

impl HttpPipeline {
    pub fn new(transport: Arc<dyn HttpClient>, policies: Vec<Arc<dyn Policy>>) -> Self {
        Self {
            policies,
            transport,
        }
    }

    pub fn builder(transport: Arc<dyn HttpClient>) -> HttpPipelineBuilder {
        HttpPipelineBuilder {
            policies: Vec::new(),
            transport,
        }
    }

    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    pub async fn send(&self, request: &mut HttpRequest) -> Result<HttpResponse> {
        let next = Next {
            policies: &self.policies,
            transport: self.transport.as_ref(),
        };
        next.run(request).await
    }
}

/// Incremental construction of an [`HttpPipeline`]
pub struct HttpPipelineBuilder {
    policies: Vec<Arc<dyn Policy>>,
    transport: Arc<dyn HttpClient>,
}

impl HttpPipelineBuilder {
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn shared_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn build(self) -> HttpPipeline {
        HttpPipeline::new(self.transport, self.policies)
    }
}
