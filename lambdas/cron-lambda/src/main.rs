use std::sync::Arc;

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use lms_shared::AppState;
use tracing_subscriber::EnvFilter;

mod handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    let state = Arc::new(AppState::from_env().await?);

    run(service_fn(move |event: LambdaEvent<handler::ScheduleEvent>| {
        let state = state.clone();
        async move { handler::function_handler(event, state).await }
    }))
    .await
}
