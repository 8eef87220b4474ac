use hemmer_provider_elasticstack::{init_logging, serve, ElasticStackProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    serve(ElasticStackProvider::new()).await
}
