use std::collections::HashMap;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use polyorm::dialect::escape_query_with_parameters;
use polyorm::prelude::*;
use polyorm::{ColumnType, Driver, DriverConnection, EntityMetadataBuilder, MetadataRegistry, SelectQueryBuilder};
use serde_json::json;

/// Compiling never touches the driver.
struct OfflineDriver(Dialect);

#[async_trait]
impl Driver for OfflineDriver {
    fn dialect(&self) -> Dialect {
        self.0
    }

    async fn connect(&self, _mode: ReplicationMode) -> OrmResult<Box<dyn DriverConnection>> {
        Err(OrmError::Connection("benchmarks run offline".to_string()))
    }
}

fn source(dialect: Dialect) -> DataSource {
    let mut registry = MetadataRegistry::new();
    let mut wide = EntityMetadataBuilder::new("Wide", "wide").primary_generated("id");
    for i in 0..100 {
        wide = wide.column(format!("col{i}"), ColumnType::Integer);
    }
    registry.register(wide.build()).unwrap();
    registry
        .register(
            EntityMetadataBuilder::new("Owner", "owners")
                .primary_generated("id")
                .one_to_many("items", "Item", "owner")
                .build(),
        )
        .unwrap();
    registry
        .register(
            EntityMetadataBuilder::new("Item", "items")
                .primary_generated("id")
                .column("name", ColumnType::Text)
                .many_to_one_with("owner", "Owner", &[("ownerId", "id")], Some("items"))
                .build(),
        )
        .unwrap();
    DataSource::builder(OfflineDriver(dialect)).registry(registry).build()
}

/// SELECT over `Wide` with `n` parameterized conditions.
fn build_select(source: &DataSource, n: usize) -> SelectQueryBuilder {
    let mut qb = source.query_builder("Wide", "w");
    for i in 0..n {
        qb.and_where(format!("w.col{i} = :p{i}"))
            .set_parameter(format!("p{i}"), i as i64);
    }
    qb
}

fn bench_compile_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/compile_select");
    let source = source(Dialect::Postgres);

    for n in [1, 5, 10, 50, 100] {
        let qb = build_select(&source, n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &qb, |b, qb| {
            b.iter(|| black_box(qb.get_query_and_parameters().unwrap()));
        });
    }

    group.finish();
}

fn bench_build_and_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/build_and_compile");

    for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::MsSql] {
        let source = source(dialect);
        group.bench_with_input(BenchmarkId::from_parameter(dialect), &source, |b, source| {
            b.iter(|| {
                let mut qb = source.query_builder("Owner", "o");
                qb.left_join_and_select("o.items", "i")
                    .where_("i.name = :name")
                    .set_parameter("name", "x")
                    .order_by("o.id", Order::Desc)
                    .take(20);
                black_box(qb.get_query_and_parameters().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_expand_parameters(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/expand_parameters");

    for n in [5, 20, 100, 500] {
        let values: Vec<Value> = (0..n).map(Value::Int).collect();
        let mut named = HashMap::new();
        named.insert("ids".to_string(), Value::Array(values));
        named.insert("name".to_string(), Value::from("x"));
        let sql = r#"SELECT * FROM "t" WHERE "id" IN (:...ids) AND "name" = :name"#;
        group.bench_with_input(BenchmarkId::from_parameter(n), &named, |b, named| {
            b.iter(|| black_box(escape_query_with_parameters(Dialect::Postgres, sql, named, &[]).unwrap()));
        });
    }

    group.finish();
}

fn bench_compile_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/compile_insert");
    let source = source(Dialect::Postgres);

    for rows in [1, 10, 100] {
        let values: Vec<_> = (0..rows).map(|i| object(json!({"name": format!("item {i}")}))).collect();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &values, |b, values| {
            b.iter(|| {
                let mut insert = source.insert_builder();
                insert.into_table("Item").values(values.clone());
                black_box(insert.get_query_and_parameters().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_compile_select,
    bench_build_and_compile,
    bench_expand_parameters,
    bench_compile_insert
);
criterion_main!(benches);
