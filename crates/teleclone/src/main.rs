use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use teleclone_core::{
    config::Config,
    pipeline::{Orchestrator, PipelineOptions},
    port::TransferClient,
    report::RunOutcome,
    Error,
};
use teleclone_gateway::GatewayClient;

#[tokio::main]
async fn main() -> Result<(), Error> {
    teleclone_core::logging::init("teleclone")?;

    let cfg = Config::load()?;
    let gateway_url = cfg
        .gateway_url
        .clone()
        .ok_or_else(|| Error::Config("GATEWAY_URL is required".into()))?;

    let client: Arc<dyn TransferClient> = Arc::new(GatewayClient::new(
        gateway_url,
        cfg.gateway_token.clone(),
        cfg.gateway_timeout,
    )?);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    let mut orchestrator = Orchestrator::new(client, PipelineOptions::from(&cfg));
    let report = orchestrator.run(cancel).await?;

    if let RunOutcome::Partial { reason } = &report.outcome {
        return Err(Error::External(format!("migration stopped early: {reason}")));
    }
    Ok(())
}
