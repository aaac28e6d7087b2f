//! Benchmarks for folio-core tree operations
//!
//! Run with: `cargo bench -p folio-core`
//!
//! - Child creation (append to a parent's ordering array)
//! - Cascading trash and single-node restore over a wide subtree
//! - Move with ancestor checks on a deep chain
//! - Root-level `get_tree` with child counts

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use folio_core::models::NodeKind;
use folio_core::services::TreeService;
use tokio::runtime::Runtime;

const OWNER: &str = "bench-owner";

/// Root collection with `sections` sub-collections of `per_section` content each
async fn build_tree(service: &TreeService, sections: usize, per_section: usize) -> String {
    let root = service
        .create_collection(OWNER, "Root", None, None)
        .await
        .unwrap();
    for s in 0..sections {
        let section = service
            .create_collection(OWNER, &format!("Section {}", s), None, Some(root.id.as_str()))
            .await
            .unwrap();
        for i in 0..per_section {
            service
                .create_content(OWNER, &format!("Lesson {}", i), None, Some(section.id.as_str()))
                .await
                .unwrap();
        }
    }
    root.id
}

fn bench_create_child(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("create_child_content", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let service = TreeService::in_memory();
                let parent = service
                    .create_collection(OWNER, "Parent", None, None)
                    .await
                    .unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let _child = service
                        .create_content(
                            OWNER,
                            &format!("Child{}", i),
                            None,
                            Some(parent.id.as_str()),
                        )
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        });
    });
}

/// Trash then restore the root of a 10 x 20 subtree
fn bench_trash_restore(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("trash_cascade");
    group.sample_size(20);

    group.bench_function("trash_restore_210_nodes", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let service = TreeService::in_memory();
                let root_id = build_tree(&service, 10, 20).await;

                let start = std::time::Instant::now();
                for _ in 0..iters {
                    service
                        .trash(OWNER, &root_id, NodeKind::Collection)
                        .await
                        .unwrap();
                    service
                        .restore(OWNER, &root_id, NodeKind::Collection)
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

/// Move a leaf between the two ends of a 100-deep chain
fn bench_move_deep(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("move_across_deep_chain", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let service = TreeService::in_memory();
                let top = service
                    .create_collection(OWNER, "Level 0", None, None)
                    .await
                    .unwrap();
                let mut bottom = top.id.clone();
                for depth in 1..100 {
                    bottom = service
                        .create_collection(
                            OWNER,
                            &format!("Level {}", depth),
                            None,
                            Some(bottom.as_str()),
                        )
                        .await
                        .unwrap()
                        .id;
                }
                let leaf = service
                    .create_content(OWNER, "Leaf", None, Some(top.id.as_str()))
                    .await
                    .unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    let target = if i % 2 == 0 { &bottom } else { &top.id };
                    service
                        .move_node(OWNER, &leaf.id, Some(target.as_str()))
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        });
    });
}

fn bench_get_tree(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let service = TreeService::in_memory();
    rt.block_on(async {
        for _ in 0..20 {
            build_tree(&service, 5, 5).await;
        }
    });

    c.bench_function("get_tree_root_level", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(service.get_tree(OWNER, None).await.unwrap());
            })
        });
    });
}

criterion_group!(
    benches,
    bench_create_child,
    bench_trash_restore,
    bench_move_deep,
    bench_get_tree
);
criterion_main!(benches);
