use common::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use document_worker::{configuration::get_configuration, startup::Application};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // Panics if the configuration can't be read
    let configuration = match get_configuration() {
        Ok(configuration) => configuration,
        Err(error) => panic!("Failed to read configuration: {:?}", error),
    };

    let tracing_subscriber = get_tracing_subscriber(
        configuration.application.name.clone(),
        configuration.application.log_level.clone(),
        std::io::stdout,
    );
    if let Err(error) = init_tracing_subscriber(tracing_subscriber) {
        panic!("Failed to initialize tracing: {:?}", error);
    }

    let application = match Application::build(configuration).await {
        Ok(application) => application,
        Err(error) => panic!("Failed to build application: {:?}", error),
    };

    // Never cancelled here: the application stops on Ctrl-C or SIGTERM
    let cancel_token = CancellationToken::new();

    if let Err(error) = application.run_until_stopped(cancel_token).await {
        panic!("Application stopped with an error: {:?}", error);
    }
}
