//! Relay payload injection utility
//!
//! Publishes hand-shaped payloads to a room, to check how clients cope with
//! producers other than themselves.
//!
//! ## Usage
//!
//! ```bash
//! # Chat message document as relaychat publishes it
//! relay-inject message --sender Bob --text "hola"
//!
//! # Document using alternative field names
//! relay-inject message --sender Bob --text "hola" --sender-key user --content-key text
//!
//! # Plain-text line, no JSON at all
//! relay-inject plain "Bob: hello there"
//!
//! # Typing signal as a document, or as headers with an empty body
//! relay-inject typing --sender Bob
//! relay-inject typing --sender Bob --stopped --headers
//!
//! # Arbitrary body
//! relay-inject raw '[TOOL_CALLS]{"content":"hi"}'
//! ```

use clap::{Parser, Subcommand};
use relaychat::config::{BrokerSection, TypingSignalMode};
use relaychat::protocol::{room_topic, typing_headers, ChatEnvelope, TypingEnvelope};
use relaychat::transport::mqtt::connection::configure_mqtt_options;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event};
use serde_json::{Map, Value};
use tokio::time::{timeout, Duration};

#[derive(Parser)]
#[command(
    name = "relay-inject",
    about = "Publish arbitrary payloads to a relaychat room"
)]
struct Args {
    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://localhost:1883", env = "RELAY_BROKER_URL")]
    broker_url: String,

    /// Exchange (room) name
    #[arg(long, default_value = "llmchat_exchange")]
    exchange: String,

    #[command(subcommand)]
    payload: PayloadKind,
}

#[derive(Subcommand)]
enum PayloadKind {
    /// Chat message document
    Message {
        #[arg(long)]
        sender: String,
        #[arg(long)]
        text: String,
        /// Key to carry the sender under
        #[arg(long, default_value = "sender")]
        sender_key: String,
        /// Key to carry the text under
        #[arg(long, default_value = "message")]
        content_key: String,
    },
    /// Plain-text body such as "Name: message"
    Plain { line: String },
    /// Typing signal
    Typing {
        #[arg(long)]
        sender: String,
        /// Publish "stopped typing" instead of "typing"
        #[arg(long)]
        stopped: bool,
        /// Send as transport headers with an empty body
        #[arg(long)]
        headers: bool,
    },
    /// Body published verbatim
    Raw { body: String },
}

/// Body, headers and QoS for one publish
struct Injection {
    body: Vec<u8>,
    headers: Vec<(String, String)>,
    qos: QoS,
}

fn build_injection(kind: &PayloadKind) -> Result<Injection, Box<dyn std::error::Error>> {
    let injection = match kind {
        PayloadKind::Message {
            sender,
            text,
            sender_key,
            content_key,
        } => {
            let body = if sender_key == "sender" && content_key == "message" {
                serde_json::to_vec(&ChatEnvelope::new(sender.as_str(), text.as_str()))?
            } else {
                let mut document = Map::new();
                document.insert("type".to_string(), Value::from("message"));
                document.insert(sender_key.clone(), Value::from(sender.as_str()));
                document.insert(content_key.clone(), Value::from(text.as_str()));
                serde_json::to_vec(&document)?
            };
            Injection {
                body,
                headers: Vec::new(),
                qos: QoS::AtLeastOnce,
            }
        }
        PayloadKind::Plain { line } | PayloadKind::Raw { body: line } => Injection {
            body: line.as_bytes().to_vec(),
            headers: Vec::new(),
            qos: QoS::AtLeastOnce,
        },
        PayloadKind::Typing {
            sender,
            stopped,
            headers,
        } => {
            let is_typing = !stopped;
            if *headers {
                Injection {
                    body: Vec::new(),
                    headers: typing_headers(sender, is_typing),
                    qos: QoS::AtMostOnce,
                }
            } else {
                Injection {
                    body: serde_json::to_vec(&TypingEnvelope::new(sender.as_str(), is_typing))?,
                    headers: Vec::new(),
                    qos: QoS::AtMostOnce,
                }
            }
        }
    };
    Ok(injection)
}

async fn inject(args: &Args, injection: Injection) -> Result<(), Box<dyn std::error::Error>> {
    let broker = BrokerSection {
        broker_url: args.broker_url.clone(),
        exchange: args.exchange.clone(),
        username_env: Some("RELAY_USERNAME".to_string()),
        password_env: Some("RELAY_PASSWORD".to_string()),
        typing_signal: TypingSignalMode::Headers,
        max_reconnect_attempts: None,
    };
    let options = configure_mqtt_options("inject", &broker)?;
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    println!("Connecting to {}...", args.broker_url);
    let connected = timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;
    match connected {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("Connection failed: {e}").into()),
        Err(_) => return Err("Timed out waiting for the broker".into()),
    }

    let topic = room_topic(&args.exchange);
    let qos = injection.qos;
    let properties = PublishProperties {
        user_properties: injection.headers,
        ..Default::default()
    };
    client
        .publish_with_properties(topic.as_str(), qos, false, injection.body, properties)
        .await?;

    // Drive the loop until the publish leaves (and is acknowledged at QoS 1)
    let _ = timeout(Duration::from_secs(2), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(..))) => break,
                Ok(Event::Outgoing(_)) if qos == QoS::AtMostOnce => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    })
    .await;

    client.disconnect().await?;
    let _ = timeout(Duration::from_millis(250), eventloop.poll()).await;

    println!("Published to {topic}");
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let injection = match build_injection(&args.payload) {
        Ok(injection) => injection,
        Err(e) => {
            eprintln!("Invalid payload: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = inject(&args, injection).await {
        eprintln!("Failed to inject: {e}");
        std::process::exit(1);
    }
}
