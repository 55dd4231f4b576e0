use std::sync::Arc;

use anyhow::{Context, Result};
use membrane_core::{Handlers, HttpWorkerHandlers};
use membrane_gateway::lifecycle::LambdaRuntimeApi;
use membrane_gateway::{
    Dispatcher, Gateway, GatewayConfig, GatewayMode, HttpGateway, LambdaGateway,
};
use membrane_resources::{DiscoveryTag, ResourceIndex, TaggingInventory};
use membrane_telemetry::install as init_telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry("membrane-gateway", env!("CARGO_PKG_VERSION"))?;

    let config = GatewayConfig::from_env()?;
    let inventory = Arc::new(TaggingInventory::from_env().await);
    let index = Arc::new(ResourceIndex::new(
        inventory,
        DiscoveryTag::new(config.stack_id.clone()),
    ));
    let handlers = Handlers::uniform(Arc::new(HttpWorkerHandlers::new(&config.worker)));
    let dispatcher = Arc::new(Dispatcher::new(index, handlers));

    let gateway: Arc<dyn Gateway> = match config.mode {
        GatewayMode::Lambda => {
            let endpoint = config
                .runtime_api
                .as_deref()
                .context("AWS_LAMBDA_RUNTIME_API is not set")?;
            info!(runtime_api = %endpoint, "membrane-gateway pulling invocations");
            Arc::new(LambdaGateway::new(
                Arc::new(LambdaRuntimeApi::new(endpoint)),
                dispatcher,
            ))
        }
        GatewayMode::Http => {
            let gateway = HttpGateway::bind(config.bind, dispatcher).await?;
            info!("membrane-gateway listening on {}", gateway.local_addr());
            Arc::new(gateway)
        }
    };

    let mut runner = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.start().await }
    });

    let joined = tokio::select! {
        joined = &mut runner => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            gateway.stop().await;
            runner.await
        }
    };

    let result = joined.context("gateway task panicked")?;
    if let Err(err) = &result {
        error!(error = %err, "gateway exited with an error");
    }
    membrane_telemetry::shutdown();
    result.map_err(Into::into)
}
