use criterion::{criterion_group, criterion_main, Criterion};
use plugsql_core::Value;
use plugsql_protocol::codec::{decode_row, encode_row};
use plugsql_protocol::frame::{decode_plugin_message, encode_plugin_message};
use plugsql_protocol::{PluginMessage, Response};

fn response_frame_bench(c: &mut Criterion) {
    let columns = vec!["id".to_string(), "name".to_string(), "score".to_string()];
    let rows = (0..1000)
        .map(|i| {
            encode_row(
                &columns,
                &[
                    Value::Int64(i),
                    Value::String(format!("user-{i}")),
                    Value::Float64(i as f64 * 0.5),
                ],
            )
            .expect("row")
        })
        .collect();
    let msg = PluginMessage::Response(Response::rows(columns.clone(), rows));

    c.bench_function("response_frame_1000_rows", |b| {
        b.iter(|| {
            let buf = encode_plugin_message(&msg).expect("encode");
            let decoded = decode_plugin_message(buf[0], &buf[5..]).expect("decode");
            if let PluginMessage::Response(resp) = decoded {
                if let plugsql_protocol::QueryResult::Rows { columns, rows } = resp.result {
                    for row in &rows {
                        decode_row(&columns, row).expect("decode row");
                    }
                }
            }
        });
    });
}

criterion_group!(frame_benches, response_frame_bench);
criterion_main!(frame_benches);
