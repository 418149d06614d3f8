//! Benchmarks for the allocator hot path and a minimal playbook run.
//!
//! Executors return immediately so the numbers isolate runtime overhead:
//! - allocate + release of one requirement against pools of increasing size
//! - characteristics matching with an inherited definition
//! - a three-step playbook end to end

use busy_runtime::{
    BusyRuntime, CharacteristicValue, EchoExecutor, ExecutionType, InMemoryDefinitionLoader,
    PlaybookDefinition, PriorityItem, Requirement, ResourceDefinition, ResourceManager,
    RuntimeConfig, StepDefinition, characteristics,
};
use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::{Map, Value, json};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn with_id(id: String) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("id".to_string(), json!(id));
    map
}

async fn pool(size: usize) -> ResourceManager {
    let manager = ResourceManager::new();
    manager
        .register_definition(ResourceDefinition::new(
            "employee",
            characteristics([("capabilities", CharacteristicValue::from(vec!["answer-phone"]))]),
        ))
        .await;
    manager
        .register_definition(
            ResourceDefinition::new(
                "senior_rep",
                characteristics([("experience_years", CharacteristicValue::from(8))]),
            )
            .extending("employee"),
        )
        .await;
    for i in 0..size {
        manager.register_instance("employee", with_id(format!("emp-{i}"))).await.ok();
    }
    manager.register_instance("senior_rep", with_id("senior-0".to_string())).await.ok();
    manager
}

fn benchmark_allocate_release(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    for size in [10, 100, 1000] {
        let manager = rt.block_on(pool(size));
        // the one matching instance is registered last, so each call scans the pool
        let requirement = Requirement::new("rep")
            .with_priority(PriorityItem::specific("missing"))
            .with_priority(PriorityItem::characteristics(characteristics([(
                "experience_years",
                ">5",
            )])));

        c.bench_function(&format!("allocate_release_{size}_instances"), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let result = manager
                        .allocate_resources("bench-step", black_box(std::slice::from_ref(&requirement)))
                        .await
                        .unwrap();
                    manager.release(&result.step_id).await;
                });
            });
        });
    }
}

fn benchmark_playbook_run(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let steps = (0..3)
        .map(|i| {
            StepDefinition::new(format!("step-{i}"), "Echo")
                .with_requirement(Requirement::new("rep").with_characteristics(characteristics([(
                    "capabilities",
                    vec!["answer-phone"],
                )])))
        })
        .collect();
    let loader = Arc::new(InMemoryDefinitionLoader::with_playbooks([PlaybookDefinition::new(
        "bench", steps,
    )]));
    let runtime = BusyRuntime::with_components(
        Arc::new(rt.block_on(pool(10))),
        Arc::default(),
        Arc::new(busy_runtime::ExecutionManager::new(RuntimeConfig::default().execution)),
        loader,
    );
    rt.block_on(runtime.register_executor(ExecutionType::Algorithmic, Arc::new(EchoExecutor::new())));

    c.bench_function("playbook_three_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let execution = runtime.execute_playbook("bench", Map::new()).await.unwrap();
                black_box(execution);
            });
        });
    });
}

criterion_group!(benches, benchmark_allocate_release, benchmark_playbook_run);
criterion_main!(benches);
