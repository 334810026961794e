#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use mailparse::MailHeaderMap;
use postbox::controller::{Outgoing, Postbox, locate_config};
use postbox_delivery::{Encryption, MemoryTransport, Plan, User};

fn write_config(dir: &Path) -> PathBuf {
    let templates = dir.join("templates");
    std::fs::create_dir_all(&templates).unwrap();
    std::fs::write(
        templates.join("invoice.plain.tera"),
        "Your plan costs {{ message }}.",
    )
    .unwrap();
    std::fs::write(
        templates.join("invoice.html.tera"),
        "<p>Your plan costs <b>{{ message }}</b>.</p>",
    )
    .unwrap();

    let config = dir.join("postbox.config.ron");
    std::fs::write(
        &config,
        format!(
            r#"(
                mailer: (
                    host: "relay.example.com",
                    port: 2525,
                    encryption: tls,
                    from_name: "Billing",
                    from_address: "billing@example.com",
                    template_dir: "{}",
                    tmp_dir: "{}",
                    verify_on_start: false,
                ),
            )"#,
            templates.display(),
            dir.join("tmp").display()
        ),
    )
    .unwrap();

    config
}

#[test]
fn config_file_is_found_and_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let found = locate_config(None, &[dir.path().join("missing.ron"), config.clone()]).unwrap();
    assert_eq!(found, config);

    let postbox = Postbox::from_file(&found).unwrap();
    assert_eq!(postbox.mailer.server_address(), "relay.example.com:2525");
    assert_eq!(postbox.mailer.encryption, Encryption::Tls);
    assert_eq!(postbox.mailer.queue_capacity, 100);
}

#[test]
fn missing_config_lists_the_paths_tried() {
    let error = locate_config(None, &[PathBuf::from("/nonexistent/postbox.config.ron")])
        .unwrap_err()
        .to_string();

    assert!(error.contains("/nonexistent/postbox.config.ron"));
}

#[tokio::test]
async fn send_renders_the_template_in_a_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let postbox = Postbox::from_file(&write_config(dir.path())).unwrap();
    let transport = MemoryTransport::new();

    let stats = postbox
        .send(
            Outgoing {
                to: "jane@example.com".to_string(),
                subject: "Your invoice plan".to_string(),
                template: Some("invoice".to_string()),
                data: Some("$10.00".to_string()),
                ..Outgoing::default()
            },
            Some(transport.clone()),
        )
        .await
        .unwrap();

    assert_eq!(stats.delivered, 1);
    let envelope = transport.delivered().remove(0);
    assert_eq!(envelope.sender, "billing@example.com");

    let parsed = mailparse::parse_mail(envelope.data.as_bytes()).unwrap();
    assert_eq!(
        parsed.headers.get_first_value("From").unwrap(),
        "Billing <billing@example.com>"
    );
    assert_eq!(parsed.ctype.mimetype, "multipart/alternative");
    assert_eq!(
        parsed.subparts[0].get_body().unwrap().trim(),
        "Your plan costs $10.00."
    );
}

#[tokio::test]
async fn send_fails_when_a_failure_was_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let postbox = Postbox::from_file(&write_config(dir.path())).unwrap();

    let error = postbox
        .send(
            Outgoing {
                to: "jane@example.com".to_string(),
                subject: "Report".to_string(),
                body: Some("Attached".to_string()),
                attachments: vec![("report.csv".to_string(), dir.path().join("missing.csv"))],
                ..Outgoing::default()
            },
            Some(MemoryTransport::new()),
        )
        .await
        .unwrap_err();

    assert!(error.to_string().contains("1 failure"));
}

#[tokio::test]
async fn subscribe_sends_invoice_and_manual() {
    let dir = tempfile::tempdir().unwrap();
    let postbox = Postbox::from_file(&write_config(dir.path())).unwrap();
    let transport = MemoryTransport::new();

    let stats = postbox
        .subscribe(
            User {
                id: 42,
                email: "ada@example.com".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
            },
            Plan {
                id: 3,
                name: "Gold".to_string(),
                amount_cents: 1000,
            },
            Some(transport.clone()),
        )
        .await
        .unwrap();

    assert_eq!(stats.delivered, 2);
    assert!(dir.path().join("tmp").join("42_manual.pdf").exists());
    assert!(
        transport
            .delivered()
            .iter()
            .all(|e| e.recipients == vec!["ada@example.com".to_string()])
    );
}
