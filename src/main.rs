//! netstate - network device and service state manager
//!
//! The library does the real work; this binary drives a scripted session
//! against the in-process stub collaborators so the state machine, the
//! credential handling and the enrollment suspension can be watched from a
//! terminal.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use netstate::manager::certs::{CertificatePattern, ClientCertMode, IssuerSubjectPattern};
use netstate::manager::plan::{CellularDataPlan, CellularDataPlanType};
use netstate::manager::stub::{StubCertStore, StubEnrollment, StubIpQuery, StubSink};
use netstate::manager::transport::IpConfig;
use netstate::manager::{NetworkStateManager, ObserverFilter};

#[derive(Parser)]
#[command(name = "netstate")]
#[command(about = "Network device and service state manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted session against the stub stack
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo => run_demo().await?,
    }

    Ok(())
}

async fn run_demo() -> anyhow::Result<()> {
    let sink = Arc::new(StubSink::default());
    let ip_query = Arc::new(StubIpQuery::default());
    let cert_store = Arc::new(StubCertStore::default());
    let enrollment = Arc::new(StubEnrollment::default());

    let mut manager = NetworkStateManager::new(sink.clone(), ip_query.clone());
    manager.set_certificate_store(cert_store.clone());
    manager.set_enrollment_handler(enrollment.clone());

    let mut events = manager.subscribe(ObserverFilter::All);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(?event, "observer");
        }
    });

    tracing::info!("Announcing devices");
    manager.update_device_list(&[
        ("/device/eth0".to_string(), json!({ "Type": "ethernet" })),
        ("/device/wlan0".to_string(), json!({ "Type": "wifi", "Scanning": true })),
        (
            "/device/cdma0".to_string(),
            json!({
                "Type": "cellular",
                "Cellular.Carrier": "Carrier X",
                "Cellular.SIMLockStatus": { "LockType": "sim-pin", "RetriesLeft": 3 },
            }),
        ),
    ]);

    tracing::info!("Announcing services");
    manager.update_service_list(&[
        (
            "/service/eth0".to_string(),
            json!({ "Type": "ethernet", "Name": "Wired", "Device": "/device/eth0", "State": "online" }),
        ),
        (
            "/service/wifi_lounge".to_string(),
            json!({
                "Type": "wifi", "Name": "Lounge", "Device": "/device/wlan0",
                "Security": "psk", "Strength": 72, "State": "idle",
            }),
        ),
        (
            "/service/wifi_lab".to_string(),
            json!({
                "Type": "wifi", "Name": "Lab", "Device": "/device/wlan0",
                "Security": "802_1x", "Strength": 51, "State": "idle",
            }),
        ),
        (
            "/service/cellular0".to_string(),
            json!({
                "Type": "cellular", "Name": "Carrier X", "Device": "/device/cdma0",
                "Cellular.ActivationState": "not-activated",
                "Cellular.PaymentUrl": "https://pay.example",
                "State": "idle",
            }),
        ),
    ]);

    // A plain PSK connect: passphrase in, stack walks the service through
    // the connecting states, address appears with "ready".
    let _ = manager.configure("/service/wifi_lounge", |network, sink| {
        network.set_passphrase(sink, "correct horse");
        network.set_auto_connect(sink, true);
    });
    ip_query.insert(
        "/device/wlan0",
        IpConfig {
            address: "192.168.1.40".to_string(),
            netmask: "255.255.255.0".to_string(),
            gateway: "192.168.1.1".to_string(),
            name_servers: "192.168.1.1".to_string(),
        },
    );
    for state in ["association", "configuration", "ready"] {
        manager.apply_service_property("/service/wifi_lounge", "State", &json!(state));
    }
    if let Some(network) = manager.visible_network("/service/wifi_lounge") {
        if let Some(config) = network.ip_config() {
            tracing::info!(
                address = %config.address,
                prefix = config.prefix_length(),
                "Lounge is up"
            );
        }
    }

    // An 802.1X connect with a certificate pattern that misses the store:
    // the attempt suspends on enrollment until the "user" finishes.
    let _ = manager.configure("/service/wifi_lab", |network, _| {
        if let Some(wifi) = network.wifi_mut() {
            wifi.set_client_cert_mode(ClientCertMode::Pattern(CertificatePattern {
                issuer: IssuerSubjectPattern {
                    organization: "Example Corp".to_string(),
                    ..Default::default()
                },
                enrollment_uris: vec!["https://enroll.example".to_string()],
                ..Default::default()
            }));
        }
    });
    let ticket = manager.connect_network("/service/wifi_lab", || {
        tracing::info!("Lab connect attempt is ready for the stack");
    });
    tracing::info!(
        pending = enrollment.pending_count(),
        spent = ticket.map(|ticket| ticket.is_spent()),
        "Certificate pattern missed; waiting on enrollment"
    );
    enrollment.complete_all();

    // Cellular activation is optimistic, and plan math clamps at zero.
    manager.start_activation("/service/cellular0");
    let now = chrono::Utc::now();
    manager.update_data_plans(
        "/service/cellular0",
        vec![CellularDataPlan {
            plan_name: "Day Pass".to_string(),
            plan_type: CellularDataPlanType::MeteredPaid,
            update_time: now,
            plan_start_time: now - chrono::Duration::days(1),
            plan_end_time: now + chrono::Duration::days(29),
            plan_data_bytes: 1024 * 1024 * 1024,
            data_bytes_used: 1000 * 1024 * 1024,
        }],
    );
    if let Some(cellular) = manager
        .visible_network("/service/cellular0")
        .and_then(|network| network.cellular())
    {
        if let Some(plan) = cellular.significant_plan() {
            tracing::info!(
                remaining_mb = plan.remaining_data() / (1024 * 1024),
                left = ?cellular.data_left(),
                "Data plan status"
            );
        }
    }

    // A failure always surfaces with a non-empty error.
    manager.apply_service_property("/service/wifi_lounge", "State", &json!("failure"));
    if let Some(network) = manager.visible_network("/service/wifi_lounge") {
        tracing::info!(
            error = ?network.error(),
            notify = network.notify_failure(),
            "Lounge dropped"
        );
    }

    tracing::info!("Logging out, erasing credentials");
    manager.erase_all_credentials();

    for network in manager.visible_networks() {
        tracing::info!(
            path = network.service_path(),
            name = network.name(),
            state = ?network.state(),
            "Final service state"
        );
    }

    drop(manager);
    let _ = printer.await;
    Ok(())
}
