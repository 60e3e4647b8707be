//! Basic WeftDB Example - Ledger Application
//!
//! This example demonstrates core WeftDB functionality:
//! - Running a top-level transaction with leaf reads and writes
//! - Nested bodies sharing their parent's engine transaction
//! - Parallel sibling transactions joined as a group
//! - Failure translation and session reset
//!
//! Run with: cargo run -p rust_ledger

use std::sync::Arc;
use weftdb_core::{CompositionKind, ScopeToken, Session};
use weftdb_engine::{MemoryEngine, StoreEngine};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,weftdb_core=debug".into()),
        )
        .init();

    let engine = Arc::new(MemoryEngine::new());
    let session = Arc::new(Session::new(Arc::clone(&engine) as Arc<dyn StoreEngine>));

    // A top-level transaction with a nested posting step. Both bodies
    // share one engine transaction; the nested call never opens its own.
    let open_scope = ScopeToken::new();
    let posting_scope = ScopeToken::new();
    session
        .run(open_scope, CompositionKind::TopLevel, {
            let session = Arc::clone(&session);
            move |tx| {
                let session = Arc::clone(&session);
                let accounts = tx.table("accounts");
                async move {
                    accounts.put(b"alice", 100u64.to_be_bytes().to_vec()).await?;
                    accounts.put(b"bob", 50u64.to_be_bytes().to_vec()).await?;
                    session
                        .run(posting_scope, CompositionKind::Nested, |tx| {
                            let journal = tx.table("journal");
                            async move {
                                journal.put(b"entry-1", b"opening balances".to_vec()).await
                            }
                        })
                        .await
                }
            }
        })
        .await?;

    println!(
        "opening balances committed: alice={:?} bob={:?}",
        engine.stored("accounts", b"alice"),
        engine.stored("accounts", b"bob")
    );

    // Three independent statements computed as parallel siblings, each in
    // its own engine transaction, joined before the group returns.
    let group = ScopeToken::new();
    let statements = [ScopeToken::new(), ScopeToken::new(), ScopeToken::new()];
    session
        .run(group, CompositionKind::Parallel, {
            let session = Arc::clone(&session);
            move |_| {
                let session = Arc::clone(&session);
                async move {
                    for (month, scope) in statements.into_iter().enumerate() {
                        session
                            .run(scope, CompositionKind::TopLevel, move |tx| {
                                let statements = tx.table("statements");
                                async move {
                                    statements
                                        .put(&[month as u8], format!("statement {month}").into_bytes())
                                        .await
                                }
                            })
                            .await?;
                    }
                    Ok(())
                }
            }
        })
        .await?;

    let stats = engine.stats();
    println!(
        "parallel statements done: {} transactions begun, {} committed, {} open at peak",
        stats.begun, stats.committed, stats.max_open
    );

    // A failing transaction aborts cleanly and leaves the session idle.
    engine.fail_table("audit", "simulated audit failure");
    let failing = ScopeToken::new();
    let result = session
        .run(failing, CompositionKind::TopLevel, |tx| {
            let audit = tx.table("audit");
            async move { audit.put(b"x", vec![0]).await }
        })
        .await;
    println!("expected failure: {}", result.unwrap_err());
    println!("session mode after failure: {}", session.mode());

    Ok(())
}
