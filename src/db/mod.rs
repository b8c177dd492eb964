pub mod models;
pub mod queries;
pub mod writer;

pub use writer::{DbWriter, PartitionGate, PartitionWriter, WriteSummary};

#[cfg(test)]
pub(crate) async fn memory_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
