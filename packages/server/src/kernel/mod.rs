//! Kernel module - infrastructure shared by the API and worker roles.

pub mod event_bus;
pub mod firecrawl_client;
pub mod gateway;
pub mod jobs;
pub mod metrics;
pub mod nats;
pub mod providers;
pub mod serp_fetcher;
pub mod supabase_client;
pub mod test_dependencies;
pub mod traits;
pub mod vault;

pub use event_bus::{generation_room, BusEvent, EventBus, EVENTS_SUBJECT};
pub use firecrawl_client::FirecrawlClient;
pub use gateway::{run_bus_relay, RoomRegistry};
pub use nats::{BusPublisher, NatsClientPublisher, PublishedMessage, TestBus};
pub use providers::{OpenRouterChat, ProductionProviders, ProviderSettings};
pub use serp_fetcher::SerpFetcher;
pub use supabase_client::{AnswerFinder, OpenRouterEmbedding, SupabaseVectorClient};
pub use vault::{mask_credential, CredentialCipher};
pub use traits::*;
