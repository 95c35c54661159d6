//! Schema creation and seed data.
//!
//! Safe to run against an already-initialized database: tables are created
//! only when missing, users are inserted with `ON CONFLICT (username) DO
//! NOTHING`, and `large_table` is only topped up to its target size.

use sqlx::PgPool;

use crate::config::SeedConfig;
use crate::error::BootstrapError;

const SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        r#"CREATE TABLE IF NOT EXISTS users (
            id SERIAL PRIMARY KEY,
            username VARCHAR(50) UNIQUE NOT NULL,
            email VARCHAR(100),
            balance DECIMAL(10,2) DEFAULT 0,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )"#,
    ),
    (
        "orders",
        r#"CREATE TABLE IF NOT EXISTS orders (
            id SERIAL PRIMARY KEY,
            user_id INTEGER REFERENCES users(id),
            amount DECIMAL(10,2),
            status VARCHAR(20) DEFAULT 'pending',
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )"#,
    ),
    (
        "audit_log",
        r#"CREATE TABLE IF NOT EXISTS audit_log (
            id SERIAL PRIMARY KEY,
            table_name VARCHAR(50),
            operation VARCHAR(10),
            record_id INTEGER,
            old_values JSONB,
            new_values JSONB,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )"#,
    ),
    (
        "large_table",
        r#"CREATE TABLE IF NOT EXISTS large_table (
            id SERIAL PRIMARY KEY,
            data TEXT,
            random_number INTEGER,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )"#,
    ),
];

/// Row counts observed once seeding finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub users: i64,
    pub large_rows: i64,
    /// Users inserted by this run; zero on a re-run
    pub users_inserted: u64,
    /// Large-table rows inserted by this run; zero on a re-run
    pub large_rows_inserted: u64,
}

/// Create the four tables and seed `users` and `large_table`.
pub async fn bootstrap(pool: &PgPool, seed: &SeedConfig) -> Result<SeedReport, BootstrapError> {
    tracing::info!("Initializing database tables and data...");

    for &(table, ddl) in SCHEMA {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .map_err(|source| BootstrapError::Schema {
                statement: table,
                source,
            })?;
        tracing::debug!(table, "table ready");
    }

    tracing::info!(users = seed.users, large_rows = seed.large_rows, "Inserting initial data...");

    let users_inserted = sqlx::query(
        r#"INSERT INTO users (username, email, balance)
           SELECT 'user' || g, 'user' || g || '@example.com', random() * 1000
           FROM generate_series(1, $1) AS g
           ON CONFLICT (username) DO NOTHING"#,
    )
    .bind(seed.users)
    .execute(pool)
    .await
    .map_err(|source| BootstrapError::Seed {
        table: "users",
        source,
    })?
    .rows_affected();

    let existing_large: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM large_table")
        .fetch_one(pool)
        .await
        .map_err(|source| BootstrapError::Seed {
            table: "large_table",
            source,
        })?;

    let missing = (seed.large_rows - existing_large).max(0);
    let large_rows_inserted = if missing > 0 {
        sqlx::query(
            r#"INSERT INTO large_table (data, random_number)
               SELECT 'Large data entry ' || g || ' with lots of text to make it bigger',
                      floor(random() * 1000)::int
               FROM generate_series($1::bigint + 1, $1::bigint + $2::bigint) AS g"#,
        )
        .bind(existing_large)
        .bind(missing)
        .execute(pool)
        .await
        .map_err(|source| BootstrapError::Seed {
            table: "large_table",
            source,
        })?
        .rows_affected()
    } else {
        0
    };

    let (users, large_rows): (i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM users), (SELECT COUNT(*) FROM large_table)",
    )
    .fetch_one(pool)
    .await
    .map_err(|source| BootstrapError::Seed {
        table: "users",
        source,
    })?;

    let report = SeedReport {
        users,
        large_rows,
        users_inserted,
        large_rows_inserted,
    };

    tracing::info!(
        users = report.users,
        users_inserted = report.users_inserted,
        large_rows = report.large_rows,
        large_rows_inserted = report.large_rows_inserted,
        "Database initialization complete!"
    );

    Ok(report)
}
