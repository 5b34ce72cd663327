//! Concurrent writers against one sled instance.
//!
//! Label assignment, the one-order-per-day rule and day approval all rely on
//! sled transactions; these tests race threads through them.

use catering_orders::{
    approval::{ApprovalPolicy, DayStatus},
    collaborators::{CatalogDish, FixedClock, InMemoryCatalog, InMemoryOrganizations},
    error::OrderError,
    meal::Day,
    order::{OrderRequest, OrderStatus, WitnessKind},
    policy::Actor,
    service::{CateringService, Collaborators},
};
use chrono::{TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::{TempDir, tempdir};

const WRITERS: usize = 8;

fn service() -> anyhow::Result<(Arc<CateringService>, TempDir)> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join("race.db"))?);

    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.upsert("cat_a", CatalogDish::new("soup", "Borscht", 350, 300));
    catalog.upsert("cat_a", CatalogDish::new("bread", "Rye bread", 40, 50));
    let organizations = Arc::new(InMemoryOrganizations::new());
    organizations.attach("cli_b", "cat_a");

    let now = Utc.with_ymd_and_hms(2024, 5, 30, 9, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(now));
    let collaborators = Collaborators::new(catalog, organizations).with_clock(clock);

    let service = CateringService::new(db, collaborators, ApprovalPolicy::default())?;
    Ok((Arc::new(service), temp_dir))
}

fn day() -> Day {
    Day::from_ymd(2024, 6, 1).unwrap()
}

/// User `u_{n}` of the client, ordering one soup.
fn soup_order(n: usize) -> (Actor, OrderRequest) {
    let user_id = format!("u_{n}");
    let user = Actor::user(user_id.clone(), user_id.clone(), "cat_a", "cli_b");
    let request = OrderRequest::new(user_id, "cat_a", "cli_b", day()).add_dish("soup");
    (user, request)
}

fn define_menu(service: &CateringService, dishes: &[&str]) -> anyhow::Result<()> {
    let admin = Actor::catering_admin("ca_1", "Carla Cook", "cat_a");
    let menu: Vec<String> = dishes.iter().map(|id| id.to_string()).collect();
    service
        .versioner()
        .define_version(&admin, "cat_a", "cli_b", day(), &menu)?;
    Ok(())
}

#[test]
fn concurrent_definitions_get_distinct_consecutive_labels() -> anyhow::Result<()> {
    let (service, _temp_dir) = service()?;
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let name = format!("Admin {n}");
                let admin = Actor::catering_admin(format!("ca_{n}"), name, "cat_a");
                let dish = if n % 2 == 0 { "soup" } else { "bread" };
                let menu = vec![dish.to_string()];
                barrier.wait();
                service
                    .versioner()
                    .define_version(&admin, "cat_a", "cli_b", day(), &menu)
            })
        })
        .collect();

    let mut labels = BTreeSet::new();
    let mut groups = BTreeSet::new();
    for handle in handles {
        let version = handle.join().expect("writer thread panicked")?;
        labels.insert(version.sequence);
        groups.insert(version.group_key);
    }

    let expected: BTreeSet<u32> = (1..=WRITERS as u32).collect();
    assert_eq!(labels, expected);
    assert_eq!(groups.len(), 1);

    let versioner = service.versioner();
    let history = versioner.history("cat_a", "cli_b", day())?;
    assert_eq!(history.len(), WRITERS);
    assert_eq!(history[0].sequence, WRITERS as u32);
    let current = versioner.current_version("cat_a", "cli_b", day())?;
    assert_eq!(current.id, history[0].id);

    Ok(())
}

#[test]
fn racing_orders_for_one_user_leave_exactly_one() -> anyhow::Result<()> {
    let (service, _temp_dir) = service()?;
    define_menu(&service, &["soup", "bread"])?;

    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let uma = Actor::user("u_uma", "Uma", "cat_a", "cli_b");
                let request = OrderRequest::new("u_uma", "cat_a", "cli_b", day());
                let dish = if n % 2 == 0 { "soup" } else { "bread" };
                barrier.wait();
                service.ledger().place_order(&uma, request.add_dish(dish))
            })
        })
        .collect();

    let mut placed = vec![];
    for handle in handles {
        match handle.join().expect("order thread panicked") {
            Ok(order) => placed.push(order),
            Err(OrderError::DuplicateOrder) => {}
            Err(other) => return Err(other.into()),
        }
    }

    assert_eq!(placed.len(), 1);
    let active = service.ledger().user_order("u_uma", day())?;
    assert_eq!(active.id, placed[0].id);

    let client_admin = Actor::client_admin("cla_1", "Boris", "cat_a", "cli_b");
    let reporter = service.reporter();
    let summary = reporter.summarize_client(&client_admin, "cli_b", day())?;
    assert_eq!(summary.order_count, 1);

    Ok(())
}

#[test]
fn approving_a_day_while_orders_arrive_approves_each_order_once() -> anyhow::Result<()> {
    const APPROVERS: usize = 2;

    // interleavings differ run to run, so race a few fresh databases
    for _ in 0..5 {
        let (service, _temp_dir) = service()?;
        define_menu(&service, &["soup"])?;
        let barrier = Arc::new(Barrier::new(WRITERS + APPROVERS));

        let writers: Vec<_> = (0..WRITERS)
            .map(|n| {
                let service = Arc::clone(&service);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let (user, request) = soup_order(n);
                    barrier.wait();
                    service.ledger().place_order(&user, request)
                })
            })
            .collect();
        let approvers: Vec<_> = (0..APPROVERS)
            .map(|_| {
                let service = Arc::clone(&service);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let boris = Actor::client_admin("cla_1", "Boris", "cat_a", "cli_b");
                    barrier.wait();
                    service.approvals().approve_day(&boris, "cli_b", day())
                })
            })
            .collect();

        for writer in writers {
            writer.join().expect("order thread panicked")?;
        }
        let mut approved = 0;
        for approver in approvers {
            approved += approver.join().expect("approver thread panicked")?;
        }

        let boris = Actor::client_admin("cla_1", "Boris", "cat_a", "cli_b");
        let reporter = service.reporter();
        let summary = reporter.summarize_client(&boris, "cli_b", day())?;
        assert_eq!(summary.order_count, WRITERS);

        let in_approved_state = summary
            .orders
            .iter()
            .filter(|order| order.current_status() == OrderStatus::Approved)
            .count();
        assert_eq!(approved, in_approved_state);

        for order in &summary.orders {
            let approve_witnesses = order
                .witness_set
                .iter()
                .filter(|witness| witness.kind == WitnessKind::Approve)
                .count();
            assert!(approve_witnesses <= 1);
        }

        // one more sweep picks up whatever arrived after the racing approvals
        let rest = service.approvals().approve_day(&boris, "cli_b", day())?;
        assert_eq!(approved + rest, WRITERS);
        let status = service.approvals().day_status("cli_b", day())?;
        assert_eq!(status, DayStatus::Approved);
    }

    Ok(())
}

#[test]
fn different_users_order_in_parallel() -> anyhow::Result<()> {
    let (service, _temp_dir) = service()?;
    define_menu(&service, &["soup"])?;

    let handles: Vec<_> = (0..WRITERS)
        .map(|n| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let (user, request) = soup_order(n);
                service.ledger().place_order(&user, request)
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("order thread panicked")?;
    }

    let admin = Actor::catering_admin("ca_1", "Carla Cook", "cat_a");
    let reporter = service.reporter();
    let catering = reporter.summarize_catering(&admin, "cat_a", day())?;
    assert_eq!(catering.order_count, WRITERS);
    assert_eq!(catering.quantity_of("soup"), WRITERS as u64);
    assert_eq!(catering.total_amount, 350 * WRITERS as u64);

    Ok(())
}
