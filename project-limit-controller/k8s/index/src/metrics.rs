use crate::SharedIndex;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedIndex);

pub fn register(reg: &mut Registry, index: SharedIndex) {
    reg.register_collector(Box::new(Instrumented(index)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let this = self.0.read();

        let projects_encoder = encoder.encode_descriptor(
            "size",
            "The number of requester-owned projects in the index",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.len() as u32).encode(projects_encoder)?;

        let requesters_encoder = encoder.encode_descriptor(
            "requesters",
            "The number of requesters that own at least one project",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.requesters() as u32).encode(requesters_encoder)?;

        let synced_encoder = encoder.encode_descriptor(
            "synced",
            "Whether the initial project listing has been indexed",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(u32::from(this.is_synced())).encode(synced_encoder)?;

        Ok(())
    }
}
