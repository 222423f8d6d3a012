//! [`MetricsBridge`]: the meter provider handed to instrument creators.
//!
//! The provider owns the reader, which owns the exporter. Shutting the bridge
//! down collects a final round of metrics and then closes the transport, so the
//! exporter is never shut down separately.

use std::fmt;
use std::time::Duration;

use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry_sdk::metrics::reader::MetricReader;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;

use crate::deadline::{run_bounded, Deadline};
use crate::error::ComponentError;

/// How often the periodic reader pushes metrics to the collector.
pub const DEFAULT_METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Holder of the metrics provider.
pub struct MetricsBridge {
    provider: SdkMeterProvider,
}

impl MetricsBridge {
    /// Build a provider around `reader` (periodic in production, manual in tests).
    pub fn from_reader<R>(reader: R, resource: Option<Resource>) -> Self
    where
        R: MetricReader,
    {
        let mut builder = SdkMeterProvider::builder().with_reader(reader);
        if let Some(resource) = resource {
            builder = builder.with_resource(resource);
        }
        Self::with_provider(builder.build())
    }

    /// Wrap a provider configured by the caller.
    pub fn with_provider(provider: SdkMeterProvider) -> Self {
        Self { provider }
    }

    /// The provider, for creating meters and instruments.
    pub fn provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    pub fn meter(&self, name: &'static str) -> Meter {
        self.provider.meter(name)
    }

    /// Flush and shut the provider down, waiting no later than `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentError::DeadlineExceeded`] if the deadline passes first,
    /// or the SDK error. Calling this twice reports the SDK's "already shut
    /// down" error on the second call.
    pub fn shutdown(&self, deadline: Deadline) -> Result<(), ComponentError> {
        let provider = self.provider.clone();
        run_bounded("metrics-shutdown", deadline.remaining(), move || {
            provider.shutdown()
        })?
        .map_err(ComponentError::from)
    }
}

impl fmt::Debug for MetricsBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsBridge").finish_non_exhaustive()
    }
}
