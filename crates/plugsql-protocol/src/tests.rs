use crate::codec::{decode_args, decode_row, decode_value, encode_args, encode_native, encode_value};
use crate::frame::{
    decode_host_message, encode_host_message, read_host_message, read_plugin_message,
    write_host_message, write_plugin_message,
};
use crate::handshake::{Endpoint, HandshakeConfig, HandshakeLine, CORE_PROTOCOL_VERSION};
use crate::messages::{
    HostMessage, PluginMessage, QueryResult, Request, Response, WireColumn, WireRow, WireValue,
};
use chrono::{TimeZone, Utc};
use plugsql_core::{Args, PlugsqlError, TxnContext, Value};
use serde::Serialize;
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;

#[test]
fn value_round_trip_preserves_every_kind() {
    let ts = Utc
        .timestamp_opt(1_700_000_000, 123_456_789)
        .single()
        .expect("ts");
    let epoch = Utc.timestamp_opt(0, 0).single().expect("epoch");
    let values = vec![
        Value::Null,
        Value::Int64(0),
        Value::Int64(i64::MIN),
        Value::Int64(i64::MAX),
        Value::Float64(0.0),
        Value::Float64(-1.25e-300),
        Value::Bool(false),
        Value::Bool(true),
        Value::Bytes(Vec::new()),
        Value::Bytes(vec![0, 255, 7]),
        Value::String(String::new()),
        Value::String("héllo".into()),
        Value::Timestamp(epoch),
        Value::Timestamp(ts),
    ];
    for value in values {
        let decoded = decode_value(&encode_value(&value)).expect("decode");
        assert_eq!(decoded, value);
    }
}

#[test]
fn integers_and_floats_stay_distinct() {
    let wire = encode_value(&Value::Int64(1));
    assert_eq!(wire.float64, None);
    assert_eq!(decode_value(&wire).expect("decode"), Value::Int64(1));
    let wire = encode_value(&Value::Float64(1.0));
    assert_eq!(wire.int64, None);
    assert_eq!(decode_value(&wire).expect("decode"), Value::Float64(1.0));
}

#[test]
fn encode_native_rejects_unsupported_types() {
    let err = encode_native(&42u32).unwrap_err();
    assert!(matches!(err, PlugsqlError::UnsupportedValueType(name) if name.contains("u32")));
    let err = encode_native(&HashMap::<String, i64>::new()).unwrap_err();
    assert!(matches!(err, PlugsqlError::UnsupportedValueType(_)));
    assert_eq!(
        encode_native(&"x").expect("str").string.as_deref(),
        Some("x")
    );
}

#[test]
fn decode_rejects_empty_and_ambiguous_values() {
    let err = decode_value(&WireValue::default()).unwrap_err();
    assert!(matches!(err, PlugsqlError::MalformedValue(_)));

    let both = WireValue {
        int64: Some(1),
        string: Some("1".into()),
        ..WireValue::default()
    };
    let err = decode_value(&both).unwrap_err();
    assert!(matches!(err, PlugsqlError::MalformedValue(_)));
}

#[test]
fn null_marker_must_be_true() {
    let not_null = WireValue {
        null: Some(false),
        ..WireValue::default()
    };
    let err = decode_value(&not_null).unwrap_err();
    assert!(matches!(err, PlugsqlError::MalformedValue(_)));

    let null = WireValue {
        null: Some(true),
        ..WireValue::default()
    };
    assert_eq!(decode_value(&null).expect("null"), Value::Null);
}

#[test]
fn args_keep_names_and_ordinals() {
    let args = Args::new().push(5i64).named("who", "bob");
    let wire = encode_args(&args);
    assert_eq!(wire[0].ordinal, 1);
    assert_eq!(wire[0].name, "");
    assert_eq!(wire[1].ordinal, 2);
    assert_eq!(wire[1].name, "who");
    let decoded = decode_args(&wire).expect("decode");
    assert_eq!(decoded, args.into_inner());
}

#[test]
fn decode_row_enforces_column_count() {
    let columns = vec!["a".to_string(), "b".to_string()];
    let row = WireRow {
        columns: vec![WireColumn {
            name: "a".into(),
            value: encode_value(&Value::Int64(1)),
        }],
    };
    let err = decode_row(&columns, &row).unwrap_err();
    assert!(matches!(
        err,
        PlugsqlError::ColumnCount {
            expected: 2,
            got: 1
        }
    ));
}

#[tokio::test]
async fn query_frame_round_trips_over_stream() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let request = Request {
        start_ts: 9,
        query: "INSERT INTO t (hello) VALUES ?".into(),
        args: encode_args(&Args::new().push("world")),
        returns_rows: false,
        txn: Some(TxnContext::default()),
    };
    write_host_message(&mut client, &HostMessage::Query(request.clone()))
        .await
        .expect("write");
    write_host_message(&mut client, &HostMessage::Ping)
        .await
        .expect("write ping");
    drop(client);

    let msg = read_host_message(&mut server).await.expect("read");
    assert_eq!(msg, Some(HostMessage::Query(request)));
    let msg = read_host_message(&mut server).await.expect("read ping");
    assert_eq!(msg, Some(HostMessage::Ping));
    let msg = read_host_message(&mut server).await.expect("eof");
    assert_eq!(msg, None);
}

#[tokio::test]
async fn plugin_frames_round_trip_over_stream() {
    let (mut client, mut server) = tokio::io::duplex(4096);
    let response = Response::rows(
        vec!["HELLO".into()],
        vec![WireRow {
            columns: vec![WireColumn {
                name: "HELLO".into(),
                value: encode_value(&Value::String("world".into())),
            }],
        }],
    );
    let ctx = TxnContext {
        commit_ts: 12,
        committed: true,
        ..TxnContext::default()
    };
    for msg in [
        PluginMessage::Response(response),
        PluginMessage::Txn(ctx),
        PluginMessage::Pong,
        PluginMessage::Error {
            message: "no such table".into(),
        },
    ] {
        write_plugin_message(&mut server, &msg).await.expect("write");
        let got = read_plugin_message(&mut client).await.expect("read");
        assert_eq!(got, Some(msg));
    }
}

#[test]
fn unknown_fields_are_ignored() {
    #[derive(Serialize)]
    struct FutureRequest {
        start_ts: u64,
        query: String,
        returns_rows: bool,
        priority: u32,
    }
    let payload = rmp_serde::to_vec_named(&FutureRequest {
        start_ts: 1,
        query: "SELECT 1".into(),
        returns_rows: true,
        priority: 3,
    })
    .expect("encode");
    let msg = decode_host_message(b'Q', &payload).expect("decode");
    match msg {
        HostMessage::Query(req) => {
            assert_eq!(req.query, "SELECT 1");
            assert!(req.returns_rows);
            assert!(req.args.is_empty());
            assert_eq!(req.txn, None);
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[test]
fn unknown_tag_is_a_protocol_error() {
    let err = decode_host_message(b'Z', &[]).unwrap_err();
    assert!(matches!(err, PlugsqlError::Protocol(_)));
}

#[tokio::test]
async fn oversized_frame_is_rejected() {
    let (mut client, mut server) = tokio::io::duplex(64);
    client.write_u8(b'Q').await.expect("tag");
    client.write_u32(u32::MAX).await.expect("len");
    let err = read_host_message(&mut server).await.unwrap_err();
    assert!(matches!(err, PlugsqlError::Protocol(_)));
}

#[test]
fn frame_header_layout() {
    let buf = encode_host_message(&HostMessage::Ping).expect("encode");
    assert_eq!(&buf[..], &[b'P', 0, 0, 0, 0]);
}

#[test]
fn default_result_is_affected() {
    assert!(!QueryResult::default().returns_rows());
    assert!(Response::rows(Vec::new(), Vec::new()).result.returns_rows());
}

#[test]
fn handshake_line_round_trips() {
    let line = HandshakeLine {
        core_version: CORE_PROTOCOL_VERSION,
        app_version: 1,
        endpoint: Endpoint::Tcp("127.0.0.1:40123".parse().expect("addr")),
    };
    let rendered = line.render();
    assert_eq!(rendered, "1|1|tcp|127.0.0.1:40123|plugsql");
    assert_eq!(HandshakeLine::parse(&rendered).expect("parse"), line);

    let unix = HandshakeLine::parse("1|1|unix|/tmp/plugsql.sock|plugsql\n").expect("parse");
    assert_eq!(unix.endpoint, Endpoint::Unix("/tmp/plugsql.sock".into()));
}

#[test]
fn handshake_unix_path_may_contain_pipes() {
    let line = HandshakeLine {
        core_version: CORE_PROTOCOL_VERSION,
        app_version: 2,
        endpoint: Endpoint::Unix("/tmp/a|b/plugin|1.sock".into()),
    };
    let rendered = line.render();
    assert_eq!(rendered, "1|2|unix|/tmp/a|b/plugin|1.sock|plugsql");
    assert_eq!(HandshakeLine::parse(&rendered).expect("parse"), line);
}

#[test]
fn handshake_line_rejects_garbage() {
    for line in [
        "",
        "hello world",
        "1|1|tcp|not-an-addr|plugsql",
        "1|1|udp|127.0.0.1:1|plugsql",
        "1|1|tcp|127.0.0.1:1|other",
        "1|1|tcp|127.0.0.1:1",
        "1|1|tcp",
    ] {
        let err = HandshakeLine::parse(line).unwrap_err();
        assert!(matches!(err, PlugsqlError::HandshakeFailed(_)), "{line}");
    }
}

#[test]
fn handshake_version_check() {
    let config = HandshakeConfig::default();
    let mut line = HandshakeLine {
        core_version: CORE_PROTOCOL_VERSION,
        app_version: config.protocol_version,
        endpoint: Endpoint::Tcp("127.0.0.1:1".parse().expect("addr")),
    };
    line.check(&config).expect("compatible");
    line.app_version += 1;
    assert!(matches!(
        line.check(&config),
        Err(PlugsqlError::HandshakeFailed(_))
    ));
}

#[test]
fn plugin_verifies_cookie_from_env() {
    let config = HandshakeConfig::default();
    let env: HashMap<String, String> = config.env().into_iter().collect();
    config
        .verify_env(|key| env.get(key).cloned())
        .expect("matching cookie");

    let err = config.verify_env(|_| None).unwrap_err();
    assert!(matches!(err, PlugsqlError::HandshakeFailed(_)));

    let mut wrong = env.clone();
    wrong.insert(config.magic_cookie_key.clone(), "nope".into());
    assert!(config.verify_env(|key| wrong.get(key).cloned()).is_err());
}
