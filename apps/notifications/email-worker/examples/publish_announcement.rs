//! Publishes a sample announcement for the notification worker
//!
//! Run with: cargo run -p notification_email_worker --example publish_announcement
//!
//! `DIRECTORY_TOKEN` is forwarded to the user directory as the bearer token.

use email::{AnnouncementCreated, EmailEvent, EventKind, NotificationStream};
use messaging::nats::{NatsProducer, StreamConfig};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let nats_url =
        std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());

    println!("Connecting to NATS at {}...", nats_url);
    let client = async_nats::connect(&nats_url).await?;
    let jetstream = async_nats::jetstream::new(client);

    println!("Creating/getting {} stream...", NotificationStream::STREAM_NAME);
    let stream_config = async_nats::jetstream::stream::Config {
        name: NotificationStream::STREAM_NAME.to_string(),
        subjects: vec![NotificationStream::SUBJECT.to_string()],
        max_messages: 100_000,
        ..Default::default()
    };
    if let Err(e) = jetstream.get_or_create_stream(stream_config).await {
        println!("Stream warning: {}", e);
    }

    let payload = AnnouncementCreated {
        id: 1,
        title: Some("Manutenção programada".to_string()),
        content: Some("A água será interrompida das 8h às 12h.".to_string()),
        category: Some("MANUTENCAO".to_string()),
        published_at: Some(chrono::Local::now().naive_local()),
        token: std::env::var("DIRECTORY_TOKEN").unwrap_or_else(|_| "dev-token".to_string()),
    };
    let event = EmailEvent::announcement_created("publish-announcement", &payload)?;

    let producer = NatsProducer::from_stream_config::<NotificationStream>(jetstream);
    let subject = NotificationStream::subject_for(&EventKind::AnnouncementCreated);
    let sequence = producer.send_to(&subject, &event).await?;

    println!("Published announcement {} on {} (sequence {})", payload.id, subject, sequence);
    println!("\nCheck the worker logs and Mailpit at http://localhost:8025");

    Ok(())
}
