use ::metrics::{
    RegistersMetrics,
    prometheus::{IntCounter, Opts, core::Collector},
};

#[derive(Clone)]
pub struct Metrics {
    pub(crate) rpc_network_errors: IntCounter,
}

impl Metrics {
    /// Every client gets its own `layer` label so the L1 and L2 connections can share a registry.
    pub fn new(layer: &str) -> Self {
        let rpc_network_errors = IntCounter::with_opts(
            Opts::new(
                "rpc_network_errors",
                "Number of network errors encountered while running RPCs.",
            )
            .const_label("layer", layer),
        )
        .expect("rpc_network_errors metric to be correctly configured");

        Self { rpc_network_errors }
    }
}

impl RegistersMetrics for Metrics {
    fn metrics(&self) -> Vec<Box<dyn Collector>> {
        vec![Box::new(self.rpc_network_errors.clone())]
    }
}
