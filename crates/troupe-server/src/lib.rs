//! # Troupe Server
//!
//! HTTP invocation endpoint for a Troupe runtime. It accepts the requests
//! produced by [`troupe::HttpTransport`] and feeds them into an
//! [`InvocationSink`](troupe::InvocationSink), normally the runtime's
//! [`HostedEndpoint`](troupe::HostedEndpoint).
//!
//! | request | reply |
//! |---------|-------|
//! | `PUT /actors/{actor}/{id}/{method}` | `200 {"ret": v}`, `204`, or a fault |
//! | `PUT /services/{service}/{method}` | same |
//! | `?oneway=true` | `202` once enqueued |
//!
//! Faults: `404` unknown actor, service or method; `400` malformed body;
//! `503` while the host is shutting down; `500` with
//! `{"Exception": {...}}` for everything else.

mod server;

pub use server::{router, serve, InvocationServer};
