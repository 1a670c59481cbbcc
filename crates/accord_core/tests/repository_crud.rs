use accord_core::clock::ManualClock;
use accord_core::db::open_db_in_memory;
use accord_core::model::{self, AccountTransaction, Email, RegistrationConfirmation, User};
use accord_core::repo::{
    FieldExpr, Filter, Inclusion, RepoError, RepoResult, RepositoryFactory, SortOrder,
    TransactionGuard, UpdateSet,
};
use accord_core::schema::{
    Audit, Entity, EntitySchema, Record, RelationKind, RelationSchema, SchemaError, SchemaRegistry,
};
use accord_core::CancellationToken;
use rusqlite::types::Value;
use rusqlite::Connection;
use uuid::Uuid;

const T0: i64 = 1_700_000_000_000;

fn user(name: &str) -> User {
    User::new(name, format!("{name}@example.com"), "hash")
}

fn setup() -> (Connection, SchemaRegistry, ManualClock) {
    (
        open_db_in_memory().unwrap(),
        model::registry().unwrap(),
        ManualClock::new(T0),
    )
}

#[test]
fn insert_stamps_the_whole_graph_with_one_timestamp() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();

    let mut ada = user("ada");
    ada.transactions
        .push(AccountTransaction::new(ada.id, 500, "opening balance"));
    ada.transactions.push(AccountTransaction::new(ada.id, -120, "coffee"));
    let inserted = users.insert(ada).unwrap();

    assert_eq!(inserted.audit.created_date, T0);
    assert_eq!(inserted.audit.updated_date, T0);
    assert!(inserted
        .transactions
        .iter()
        .all(|entry| entry.audit.created_date == T0 && entry.audit.updated_date == T0));

    let loaded = users
        .find(
            &inserted.id,
            &[Inclusion::of::<User>(User::TRANSACTIONS).unwrap()],
        )
        .unwrap();
    assert_eq!(loaded.transactions.len(), 2);
    assert_eq!(loaded.balance(), 380);
    assert_eq!(loaded.password_hash, "hash");
}

#[test]
fn insert_many_shares_the_timestamp_and_is_atomic() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();

    let inserted = users.insert_many(vec![user("ada"), user("bob")]).unwrap();
    assert!(inserted
        .iter()
        .all(|u| u.audit.created_date == T0 && u.audit.updated_date == T0));

    // The second user collides on the unique user name, so neither row lands.
    let err = users
        .insert_many(vec![user("cyd"), User::new("ada", "other@example.com", "h")])
        .unwrap_err();
    assert!(matches!(err, RepoError::Db(_)));
    assert_eq!(users.query(&[]).count().unwrap(), 2);
    assert!(users
        .query(&[])
        .filter(Filter::eq(User::USER_NAME, "cyd".to_string()))
        .first()
        .unwrap()
        .is_none());
}

#[test]
fn find_unknown_key_is_not_found() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();

    let missing = Uuid::new_v4();
    let err = users.find(&missing, &[]).unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound { entity: "User", ref key } if *key == missing.to_string()
    ));
    assert!(!users.exists(&missing).unwrap());
}

#[test]
fn nested_inclusions_load_many_to_many_and_parents() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();
    let emails = factory.repository::<Email>().unwrap();
    let confirmations = factory.repository::<RegistrationConfirmation>().unwrap();

    let ada = users.insert(user("ada")).unwrap();
    let bob = users.insert(user("bob")).unwrap();
    emails
        .insert(Email::new("hello", "both", vec![ada.clone(), bob.clone()]))
        .unwrap();
    emails
        .insert(Email::new("psst", "only ada", vec![ada.clone()]))
        .unwrap();
    let pending = confirmations
        .insert(RegistrationConfirmation::new(bob.id))
        .unwrap();

    let receivers = Inclusion::of::<User>(User::EMAILS)
        .unwrap()
        .with_child(Inclusion::of::<Email>(Email::RECEIVERS).unwrap())
        .unwrap();
    let loaded = users
        .query(&[receivers.clone()])
        .order_by(User::USER_NAME, SortOrder::Ascending)
        .fetch()
        .unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].emails.len(), 2);
    assert_eq!(loaded[1].emails.len(), 1);
    let shared = loaded[1].emails.first().unwrap();
    let mut addresses = shared.receiver_addresses();
    addresses.sort_unstable();
    assert_eq!(addresses, vec!["ada@example.com", "bob@example.com"]);

    // The same tree drives a second query unchanged.
    assert_eq!(receivers.paths(), vec!["Emails.Receivers".to_string()]);
    let bob_again = users.find(&bob.id, &[receivers]).unwrap();
    assert_eq!(bob_again.emails.len(), 1);

    let with_user = confirmations
        .find(
            &pending.id,
            &[Inclusion::of::<RegistrationConfirmation>(RegistrationConfirmation::USER).unwrap()],
        )
        .unwrap();
    assert_eq!(with_user.user.as_deref().map(|u| u.id), Some(bob.id));
}

#[test]
fn inclusions_are_validated_against_the_schema() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();
    users.insert(user("ada")).unwrap();

    assert!(matches!(
        Inclusion::of::<User>("Friends"),
        Err(SchemaError::UnknownRelation { .. })
    ));
    assert!(Inclusion::of::<User>(User::EMAILS)
        .unwrap()
        .with_child(Inclusion::of::<User>(User::TRANSACTIONS).unwrap())
        .is_err());

    let foreign = Inclusion::of::<Email>(Email::RECEIVERS).unwrap();
    let err = users.query(&[foreign]).fetch().unwrap_err();
    assert!(matches!(
        err,
        RepoError::Schema(SchemaError::InclusionMismatch { .. })
    ));

    let err = users.query(&[]).include_path("Emails.Senders").fetch().unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::UnknownRelation { .. })));
}

#[test]
fn queries_filter_order_and_page() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();
    for name in ["dee", "ada", "cyd", "bob"] {
        users.insert(user(name)).unwrap();
        clock.advance(1_000);
    }

    let page = users
        .query(&[])
        .order_by(User::USER_NAME, SortOrder::Descending)
        .offset(1)
        .limit(2)
        .fetch()
        .unwrap();
    let names: Vec<_> = page.iter().map(|u| u.user_name.as_str()).collect();
    assert_eq!(names, vec!["cyd", "bob"]);

    // Without an explicit order rows come back in creation order.
    let first = users.query(&[]).first().unwrap().unwrap();
    assert_eq!(first.user_name, "dee");

    let picked = users
        .query(&[])
        .filter(Filter::in_list(
            User::USER_NAME,
            vec![Value::Text("ada".into()), Value::Text("bob".into())],
        ))
        .filter(Filter::gt(accord_core::schema::CREATED_DATE_COLUMN, T0))
        .count()
        .unwrap();
    assert_eq!(picked, 2);

    let none = users
        .query(&[])
        .filter(Filter::in_list(User::USER_NAME, Vec::new()))
        .exists()
        .unwrap();
    assert!(!none);

    let err = users
        .query(&[])
        .filter(Filter::eq("nickname", "x".to_string()))
        .count()
        .unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::UnknownColumn { .. })));
}

#[test]
fn updates_compute_from_the_current_row_and_always_touch_updated_date() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();
    let entries = factory.repository::<AccountTransaction>().unwrap();

    let ada = users.insert(user("ada")).unwrap();
    let entry = entries
        .insert(AccountTransaction::new(ada.id, 100, "deposit"))
        .unwrap();

    clock.advance(5_000);
    let set = UpdateSet::new()
        .set_expr(
            AccountTransaction::AMOUNT,
            FieldExpr::column(AccountTransaction::AMOUNT).mul(FieldExpr::value(3i64)),
        )
        .set_expr(
            AccountTransaction::DESCRIPTION,
            FieldExpr::column(AccountTransaction::DESCRIPTION).concat(FieldExpr::value(" x3".to_string())),
        )
        .set("created_date", 0i64);
    assert_eq!(entries.update(&entry, &set).unwrap(), 1);

    let reloaded = entries.find(&entry.id, &[]).unwrap();
    assert_eq!(reloaded.amount, 300);
    assert_eq!(reloaded.description, "deposit x3");
    assert_eq!(reloaded.audit.created_date, T0);
    assert_eq!(reloaded.audit.updated_date, T0 + 5_000);

    // Only protected fields: still a valid update that bumps updated_date.
    clock.advance(1_000);
    let protected_only = UpdateSet::<User>::new().set("id", "other".to_string()).set("updated_date", 1i64);
    assert_eq!(users.update(&ada, &protected_only).unwrap(), 1);
    let reloaded = users.find(&ada.id, &[]).unwrap();
    assert_eq!(reloaded.id, ada.id);
    assert_eq!(reloaded.audit.updated_date, T0 + 6_000);

    let err = users
        .update(&ada, &UpdateSet::new().set("nickname", "x".to_string()))
        .unwrap_err();
    assert!(matches!(err, RepoError::Schema(SchemaError::UnknownColumn { .. })));
}

#[test]
fn deletes_cascade_to_owned_rows() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();
    let entries = factory.repository::<AccountTransaction>().unwrap();

    let mut ada = user("ada");
    ada.transactions.push(AccountTransaction::new(ada.id, 1, "a"));
    let ada = users.insert(ada).unwrap();
    let bob = users.insert(user("bob")).unwrap();
    let cyd = users.insert(user("cyd")).unwrap();

    assert_eq!(users.delete(&ada).unwrap(), 1);
    assert_eq!(entries.query(&[]).count().unwrap(), 0);

    let selection = users
        .query(&[])
        .filter(Filter::eq(User::USER_NAME, "bob".to_string()));
    assert_eq!(users.delete_query(&selection).unwrap(), 1);
    assert_eq!(users.delete_many(&[cyd, bob]).unwrap(), 1);
    assert_eq!(users.query(&[]).count().unwrap(), 0);
    assert_eq!(users.delete_where(Filter::is_not_null(User::USER_NAME)).unwrap(), 0);
}

#[test]
fn guard_rolls_back_uncommitted_work_on_drop() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();
    let transactions = factory.transactions();

    {
        let _guard = TransactionGuard::begin(&transactions, factory.cancellation()).unwrap();
        users.insert(user("ada")).unwrap();
    }
    assert_eq!(users.query(&[]).count().unwrap(), 0);

    let guard = TransactionGuard::begin(&transactions, factory.cancellation()).unwrap();
    users.insert(user("bob")).unwrap();
    guard.commit().unwrap();
    assert_eq!(users.query(&[]).count().unwrap(), 1);
    assert!(!transactions.is_active());
}

#[test]
fn cancelled_scopes_refuse_store_calls() {
    let (conn, registry, clock) = setup();
    let cancel = CancellationToken::new();
    let factory = RepositoryFactory::new(&conn, &registry, &clock).with_cancellation(cancel.clone());
    let users = factory.repository::<User>().unwrap();
    users.insert(user("ada")).unwrap();

    cancel.cancel();
    assert!(matches!(users.query(&[]).fetch(), Err(RepoError::Cancelled)));
    assert!(matches!(users.insert(user("bob")), Err(RepoError::Cancelled)));

    let fresh = RepositoryFactory::new(&conn, &registry, &clock);
    assert_eq!(fresh.repository::<User>().unwrap().query(&[]).count().unwrap(), 1);
}

static AUTHORS: EntitySchema = EntitySchema {
    name: "Author",
    table: "authors",
    columns: &["id", "name", "created_date", "updated_date"],
    relations: &[RelationSchema {
        name: "Books",
        target: "Book",
        kind: RelationKind::HasMany {
            foreign_key: "author_id",
        },
    }],
};

static BOOKS: EntitySchema = EntitySchema {
    name: "Book",
    table: "books",
    columns: &["id", "author_id", "title", "created_date", "updated_date"],
    relations: &[],
};

/// Owns its books but keeps the default `stamp_created`.
struct Author {
    id: Uuid,
    name: String,
    audit: Audit,
    books: Vec<Book>,
}

struct Book {
    id: Uuid,
    title: String,
    audit: Audit,
}

impl Entity for Author {
    type Key = Uuid;

    fn schema() -> &'static EntitySchema {
        &AUTHORS
    }

    fn key(&self) -> &Uuid {
        &self.id
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }

    fn to_record(&self) -> Record {
        self.audit.write_to(
            Record::new()
                .with_key("id", &self.id)
                .with_text("name", self.name.as_str())
                .with_related("Books", self.books.iter().map(Entity::to_record).collect()),
        )
    }

    fn from_record(record: Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.key("id")?,
            name: record.text("name")?,
            audit: Audit::read_from(&record)?,
            books: Vec::new(),
        })
    }
}

impl Entity for Book {
    type Key = Uuid;

    fn schema() -> &'static EntitySchema {
        &BOOKS
    }

    fn key(&self) -> &Uuid {
        &self.id
    }

    fn audit_mut(&mut self) -> &mut Audit {
        &mut self.audit
    }

    fn to_record(&self) -> Record {
        self.audit.write_to(
            Record::new()
                .with_key("id", &self.id)
                .with_text("title", self.title.as_str()),
        )
    }

    fn from_record(record: Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.key("id")?,
            title: record.text("title")?,
            audit: Audit::read_from(&record)?,
        })
    }
}

#[test]
fn cascaded_children_are_stamped_without_entity_help() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE authors (
             id TEXT PRIMARY KEY NOT NULL,
             name TEXT NOT NULL,
             created_date INTEGER NOT NULL,
             updated_date INTEGER NOT NULL
         );
         CREATE TABLE books (
             id TEXT PRIMARY KEY NOT NULL,
             author_id TEXT NOT NULL REFERENCES authors (id) ON DELETE CASCADE,
             title TEXT NOT NULL,
             created_date INTEGER NOT NULL,
             updated_date INTEGER NOT NULL
         );",
    )
    .unwrap();
    let registry = SchemaRegistry::builder()
        .register(&AUTHORS)
        .register(&BOOKS)
        .build()
        .unwrap();
    let clock = ManualClock::new(T0);
    let factory = RepositoryFactory::new(&conn, &registry, &clock);

    let book_id = Uuid::new_v4();
    let author = Author {
        id: Uuid::new_v4(),
        name: "ursula".to_string(),
        audit: Audit::default(),
        books: vec![Book {
            id: book_id,
            title: "the dispossessed".to_string(),
            audit: Audit::default(),
        }],
    };
    let inserted = factory.repository::<Author>().unwrap().insert(author).unwrap();
    assert_eq!(inserted.audit.created_date, T0);

    let (created, updated, owner): (i64, i64, String) = conn
        .query_row(
            "SELECT created_date, updated_date, author_id FROM books WHERE id = ?1",
            [book_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!((created, updated), (T0, T0));
    assert_eq!(owner, inserted.id.to_string());

    let stored = factory.repository::<Book>().unwrap().find(&book_id, &[]).unwrap();
    assert_eq!(stored.title, "the dispossessed");
    assert_eq!(stored.audit.updated_date, T0);
}

#[test]
fn key_deletes_span_several_batches() {
    let (conn, registry, clock) = setup();
    let factory = RepositoryFactory::new(&conn, &registry, &clock);
    let users = factory.repository::<User>().unwrap();

    let batch: Vec<User> = (0..1_200).map(|index| user(&format!("u{index}"))).collect();
    let inserted = users.insert_many(batch).unwrap();
    let mut keys: Vec<Uuid> = inserted.iter().map(|u| u.id).collect();
    keys.push(Uuid::new_v4());

    assert_eq!(users.delete_keys(&keys[..1_000]).unwrap(), 1_000);
    assert_eq!(users.delete_keys(&keys[1_000..]).unwrap(), 200);
    assert_eq!(users.delete_keys(&[]).unwrap(), 0);
    assert_eq!(users.query(&[]).count().unwrap(), 0);
}
