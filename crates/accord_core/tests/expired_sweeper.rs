use accord_core::clock::{ManualClock, HOUR_MS};
use accord_core::db::{open_db, DbError};
use accord_core::model::{self, RegistrationConfirmation, User, UserId};
use accord_core::repo::RepositoryFactory;
use accord_core::service::{
    DatabaseFile, ExpiredRegistrationSweeper, RegistrationConfirmationManager, ServiceError,
    SweeperSettings, UserManager,
};
use rusqlite::params;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const NOW: i64 = 1_700_000_000_000;

fn settings() -> SweeperSettings {
    SweeperSettings {
        interval: Duration::from_secs(3600),
        retention_ms: 24 * HOUR_MS,
    }
}

/// Seeds `old` registrations created 25h before `NOW` and `fresh` ones
/// created 1h before; returns the ids of the old users.
fn seed(path: &Path, old: usize, fresh: usize) -> Vec<UserId> {
    let conn = open_db(path).unwrap();
    let registry = model::registry().unwrap();
    let clock = ManualClock::new(NOW - 25 * HOUR_MS);
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = UserManager::new(&factory).unwrap();
    let confirmations = RegistrationConfirmationManager::new(&factory).unwrap();

    let mut old_ids = Vec::new();
    for index in 0..old + fresh {
        if index == old {
            clock.set(NOW - HOUR_MS);
        }
        let user = users
            .add_user(User::new(
                format!("user{index}"),
                format!("user{index}@example.com"),
                "hashed:x",
            ))
            .unwrap();
        confirmations.register(&user).unwrap();
        if index < old {
            old_ids.push(user.id);
        }
    }
    old_ids
}

fn remaining_users(path: &Path) -> Vec<UserId> {
    let conn = open_db(path).unwrap();
    let registry = model::registry().unwrap();
    let clock = ManualClock::new(NOW);
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    factory.repository::<User>().unwrap().query(&[]).keys().unwrap()
}

#[test]
fn tick_removes_only_expired_unconfirmed_users() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.sqlite3");
    let old_ids = seed(&path, 3, 7);

    let sweeper = ExpiredRegistrationSweeper::new(
        DatabaseFile(path.clone()),
        Arc::new(ManualClock::new(NOW)),
        settings(),
    )
    .unwrap();
    assert_eq!(sweeper.tick().unwrap(), 3);

    let remaining = remaining_users(&path);
    assert_eq!(remaining.len(), 7);
    assert!(old_ids.iter().all(|id| !remaining.contains(id)));

    let conn = open_db(&path).unwrap();
    let confirmations: i64 = conn
        .query_row("SELECT COUNT(*) FROM registration_confirmations", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(confirmations, 7);

    assert_eq!(sweeper.tick().unwrap(), 0);
}

#[test]
fn confirmed_registrations_survive_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.sqlite3");
    let old_ids = seed(&path, 2, 0);

    {
        let conn = open_db(&path).unwrap();
        let registry = model::registry().unwrap();
        let clock = ManualClock::new(NOW);
        let factory = RepositoryFactory::new(&conn, &registry, &clock);
        let pending = factory
            .repository::<RegistrationConfirmation>()
            .unwrap()
            .query(&[])
            .fetch()
            .unwrap();
        let first = pending
            .iter()
            .find(|confirmation| confirmation.user_id == old_ids[0])
            .unwrap();
        RegistrationConfirmationManager::new(&factory)
            .unwrap()
            .confirm(&first.id)
            .unwrap();
    }

    let sweeper = ExpiredRegistrationSweeper::new(
        DatabaseFile(path.clone()),
        Arc::new(ManualClock::new(NOW)),
        settings(),
    )
    .unwrap();
    assert_eq!(sweeper.tick().unwrap(), 1);
    assert_eq!(remaining_users(&path), vec![old_ids[0]]);
}

#[test]
fn spawned_sweeper_runs_a_pass_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.sqlite3");
    seed(&path, 1, 1);

    let source_path = path.clone();
    let sweeper = ExpiredRegistrationSweeper::new(
        move || open_db(&source_path),
        Arc::new(ManualClock::new(NOW)),
        settings(),
    )
    .unwrap();
    let handle = sweeper.spawn().unwrap();
    handle.stop();

    assert_eq!(remaining_users(&path).len(), 1);
}

#[test]
fn unreachable_store_fails_the_tick() {
    let sweeper = ExpiredRegistrationSweeper::new(
        || -> Result<rusqlite::Connection, DbError> {
            Err(DbError::UnsupportedSchemaVersion {
                db_version: 99,
                latest_supported: 1,
            })
        },
        Arc::new(ManualClock::new(NOW)),
        settings(),
    )
    .unwrap();
    let err = sweeper.tick().unwrap_err();
    assert!(matches!(err, ServiceError::Store(_)));
}

/// Seeds `count` unconfirmed registrations created 25h before `NOW`
/// directly through SQL, in one transaction.
fn seed_backlog(path: &Path, count: usize) {
    let mut conn = open_db(path).unwrap();
    let created = NOW - 25 * HOUR_MS;
    let tx = conn.transaction().unwrap();
    {
        let mut add_user = tx
            .prepare(
                "INSERT INTO users (id, user_name, email_address, password_hash, created_date, updated_date)
                 VALUES (?1, ?2, ?3, 'hashed:x', ?4, ?4)",
            )
            .unwrap();
        let mut add_confirmation = tx
            .prepare(
                "INSERT INTO registration_confirmations (id, user_id, confirmation_date, created_date, updated_date)
                 VALUES (?1, ?2, NULL, ?3, ?3)",
            )
            .unwrap();
        for index in 0..count {
            let user_id = Uuid::new_v4().to_string();
            add_user
                .execute(params![
                    user_id,
                    format!("bulk{index}"),
                    format!("bulk{index}@example.com"),
                    created
                ])
                .unwrap();
            add_confirmation
                .execute(params![Uuid::new_v4().to_string(), user_id, created])
                .unwrap();
        }
    }
    tx.commit().unwrap();
}

#[test]
fn large_backlog_is_removed_in_one_tick() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.sqlite3");
    seed_backlog(&path, 33_000);
    seed(&path, 0, 2);

    let sweeper = ExpiredRegistrationSweeper::new(
        DatabaseFile(path.clone()),
        Arc::new(ManualClock::new(NOW)),
        settings(),
    )
    .unwrap();
    assert_eq!(sweeper.tick().unwrap(), 33_000);
    assert_eq!(remaining_users(&path).len(), 2);
    assert_eq!(sweeper.tick().unwrap(), 0);
}

#[test]
fn confirmation_after_an_earlier_read_still_saves_the_user() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.sqlite3");
    let old_ids = seed(&path, 2, 0);
    let cutoff = NOW - 24 * HOUR_MS;

    let reader = open_db(&path).unwrap();
    let registry = model::registry().unwrap();
    let clock = ManualClock::new(NOW);
    let reader_factory = RepositoryFactory::new(&reader, &registry, &clock);
    let snapshot = RegistrationConfirmationManager::new(&reader_factory)
        .unwrap()
        .expired(cutoff)
        .unwrap();
    assert_eq!(snapshot.len(), 2);

    // Another connection confirms one of the listed registrations.
    {
        let writer = open_db(&path).unwrap();
        let writer_factory = RepositoryFactory::new(&writer, &registry, &clock);
        let pending = snapshot
            .iter()
            .find(|confirmation| confirmation.user_id == old_ids[1])
            .unwrap();
        RegistrationConfirmationManager::new(&writer_factory)
            .unwrap()
            .confirm(&pending.id)
            .unwrap();
    }

    let removed = UserManager::new(&reader_factory)
        .unwrap()
        .remove_unconfirmed_before(cutoff)
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(remaining_users(&path), vec![old_ids[1]]);
}
