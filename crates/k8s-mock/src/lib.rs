//! Mock Kubernetes API server for testing.
//!
//! Provides an HTTP server holding objects in memory, reachable through a
//! regular kubeconfig-based `kube::Client`.

pub mod discovery;
mod helpers;
pub mod http;

pub use discovery::{MockApiResource, MockDiscovery};
pub use http::{Fault, HttpMockK8sServer, RecordedRequest, RunningHttpMockK8sServer};
