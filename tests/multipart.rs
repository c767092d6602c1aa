//! End-to-end multipart scenarios: encode → wire → decode.

use bytes::Bytes;
use httpwire::multipart::{
    EncoderMode, FormEncoder, MultipartConfig, MultipartDecoder, StoragePolicy,
};
use httpwire::{HeaderMap, HttpObject, Method, MessageHead};

fn decode_body(content_type: &str, body: &[u8], config: MultipartConfig) -> MultipartDecoder {
    let mut decoder = MultipartDecoder::new(content_type, config).unwrap();
    decoder
        .offer(&HttpObject::Chunk(Bytes::copy_from_slice(body)))
        .unwrap();
    decoder
        .offer(&HttpObject::Last(HeaderMap::new()))
        .unwrap();
    decoder
}

fn encode_form(encoder: &mut FormEncoder) -> (String, Vec<u8>) {
    let mut head = MessageHead::request(Method::Post, "/upload");
    encoder.finalize(&mut head).unwrap();
    let content_type = head.headers.get_str("content-type").unwrap().to_string();
    let mut body = Vec::new();
    while let Some(chunk) = encoder.read_chunk() {
        body.extend_from_slice(&chunk);
    }
    (content_type, body)
}

#[test]
fn multipart_round_trip() {
    let mut encoder = FormEncoder::multipart(&Method::Post, EncoderMode::Rfc1738).unwrap();
    encoder.add_attribute("a", "bar").unwrap();
    encoder.add_attribute("b", "baz qux").unwrap();
    encoder.add_attribute("empty", "").unwrap();
    encoder
        .add_file_upload(
            "upload",
            "data.bin",
            "application/octet-stream",
            true,
            None,
            Bytes::from_static(b"\x00\x01\x02 raw bytes \xff"),
        )
        .unwrap();

    let (content_type, body) = encode_form(&mut encoder);
    let mut decoder = decode_body(&content_type, &body, MultipartConfig::default());

    let mut attr = decoder.next().unwrap();
    assert_eq!(attr.name(), "a");
    assert_eq!(attr.string().unwrap(), "bar");

    let mut attr = decoder.next().unwrap();
    assert_eq!(attr.name(), "b");
    assert_eq!(attr.string().unwrap(), "baz qux");

    let mut attr = decoder.next().unwrap();
    assert_eq!(attr.name(), "empty");
    assert_eq!(attr.string().unwrap(), "");

    let mut file = decoder.next().unwrap();
    assert!(file.is_file_upload());
    assert_eq!(file.name(), "upload");
    assert_eq!(file.filename(), Some("data.bin"));
    assert_eq!(file.content_type(), Some("application/octet-stream"));
    assert_eq!(file.transfer_encoding(), Some("binary"));
    assert_eq!(&file.bytes().unwrap()[..], b"\x00\x01\x02 raw bytes \xff");

    assert!(decoder.next().is_none());
}

#[test]
fn round_trip_survives_any_chunking() {
    let mut encoder = FormEncoder::multipart(&Method::Post, EncoderMode::Rfc1738).unwrap();
    encoder.add_attribute("k", "value one").unwrap();
    encoder
        .add_file_upload(
            "f",
            "a.txt",
            "text/plain",
            false,
            Some("utf-8"),
            Bytes::from_static(b"file body here"),
        )
        .unwrap();
    let (content_type, body) = encode_form(&mut encoder);

    for window in [1usize, 2, 3, 7, 16, 64] {
        let mut decoder =
            MultipartDecoder::new(&content_type, MultipartConfig::default()).unwrap();
        for piece in body.chunks(window) {
            decoder
                .offer(&HttpObject::Chunk(Bytes::copy_from_slice(piece)))
                .unwrap();
        }
        decoder.offer(&HttpObject::Last(HeaderMap::new())).unwrap();

        let mut attr = decoder.next().expect("attribute");
        assert_eq!(attr.string().unwrap(), "value one", "window {}", window);
        let mut file = decoder.next().expect("file");
        assert_eq!(
            &file.bytes().unwrap()[..],
            b"file body here",
            "window {}",
            window
        );
    }
}

/// Two same-named uploads produce one nested multipart/mixed group in
/// default mode, and two independent parts in HTML5 mode.
#[test]
fn mixed_mode_promotion_and_html5() {
    let run = |mode: EncoderMode| {
        let mut encoder = FormEncoder::multipart(&Method::Post, mode).unwrap();
        encoder
            .add_file_upload(
                "quux",
                "f1.txt",
                "text/plain",
                false,
                None,
                Bytes::from_static(b"first file"),
            )
            .unwrap();
        encoder
            .add_file_upload(
                "quux",
                "f2.txt",
                "text/plain",
                false,
                None,
                Bytes::from_static(b"second file"),
            )
            .unwrap();
        encode_form(&mut encoder)
    };

    let (content_type, body) = run(EncoderMode::Rfc1738);
    let text = String::from_utf8_lossy(&body);
    assert_eq!(text.matches("multipart/mixed; boundary=").count(), 1);

    let mut decoder = decode_body(&content_type, &body, MultipartConfig::default());
    let mut f1 = decoder.next().unwrap();
    let mut f2 = decoder.next().unwrap();
    assert_eq!((f1.name(), f1.filename()), ("quux", Some("f1.txt")));
    assert_eq!((f2.name(), f2.filename()), ("quux", Some("f2.txt")));
    assert_eq!(f1.string().unwrap(), "first file");
    assert_eq!(f2.string().unwrap(), "second file");

    let (content_type, body) = run(EncoderMode::Html5);
    let text = String::from_utf8_lossy(&body);
    assert!(!text.contains("multipart/mixed"));

    let mut decoder = decode_body(&content_type, &body, MultipartConfig::default());
    let f1 = decoder.next().unwrap();
    let f2 = decoder.next().unwrap();
    assert_eq!((f1.name(), f1.filename()), ("quux", Some("f1.txt")));
    assert_eq!((f2.name(), f2.filename()), ("quux", Some("f2.txt")));
}

#[test]
fn differently_named_upload_closes_the_group() {
    let mut encoder = FormEncoder::multipart(&Method::Post, EncoderMode::Rfc1738).unwrap();
    encoder
        .add_file_upload("quux", "f1", "text/plain", false, None, Bytes::from_static(b"1"))
        .unwrap();
    encoder
        .add_file_upload("quux", "f2", "text/plain", false, None, Bytes::from_static(b"2"))
        .unwrap();
    encoder
        .add_file_upload("other", "f3", "text/plain", false, None, Bytes::from_static(b"3"))
        .unwrap();

    let (content_type, body) = encode_form(&mut encoder);
    let mut decoder = decode_body(&content_type, &body, MultipartConfig::default());

    let names: Vec<(String, Option<String>)> = std::iter::from_fn(|| decoder.next())
        .map(|p| (p.name().to_string(), p.filename().map(|f| f.to_string())))
        .collect();
    assert_eq!(
        names,
        [
            ("quux".to_string(), Some("f1".to_string())),
            ("quux".to_string(), Some("f2".to_string())),
            ("other".to_string(), Some("f3".to_string())),
        ]
    );
}

#[test]
fn temp_files_swept_after_clean() {
    let base_dir =
        std::env::temp_dir().join(format!("httpwire-sweep-{:016x}", rand_token()));
    std::fs::create_dir_all(&base_dir).unwrap();

    let mut config = MultipartConfig::default();
    config.policy = StoragePolicy::Disk;
    config.base_dir = base_dir.clone();

    let mut encoder = FormEncoder::multipart(&Method::Post, EncoderMode::Rfc1738).unwrap();
    encoder
        .add_file_upload(
            "f",
            "big.bin",
            "application/octet-stream",
            true,
            None,
            Bytes::from(vec![7u8; 64 * 1024]),
        )
        .unwrap();
    let (content_type, body) = encode_form(&mut encoder);

    let mut decoder = decode_body(&content_type, &body, config);
    let mut file = decoder.next().unwrap();
    assert!(!file.in_memory());
    assert_eq!(file.size(), 64 * 1024);
    assert_eq!(std::fs::read_dir(&base_dir).unwrap().count(), 1);

    decoder.clean_files();
    assert_eq!(std::fs::read_dir(&base_dir).unwrap().count(), 0);

    drop(file);
    std::fs::remove_dir_all(&base_dir).unwrap();
}

#[test]
fn mixed_policy_promotes_large_uploads_only() {
    let base_dir =
        std::env::temp_dir().join(format!("httpwire-mixed-{:016x}", rand_token()));
    std::fs::create_dir_all(&base_dir).unwrap();

    let mut config = MultipartConfig::default();
    config.policy = StoragePolicy::Mixed { limit: 32 };
    config.base_dir = base_dir.clone();

    let mut encoder = FormEncoder::multipart(&Method::Post, EncoderMode::Rfc1738).unwrap();
    encoder.add_attribute("small", "tiny").unwrap();
    encoder
        .add_file_upload(
            "big",
            "big.bin",
            "application/octet-stream",
            true,
            None,
            Bytes::from(vec![1u8; 256]),
        )
        .unwrap();
    let (content_type, body) = encode_form(&mut encoder);

    let mut decoder = decode_body(&content_type, &body, config);
    let small = decoder.next().unwrap();
    assert!(small.in_memory());
    let big = decoder.next().unwrap();
    assert!(!big.in_memory());

    decoder.destroy();
    assert_eq!(std::fs::read_dir(&base_dir).unwrap().count(), 0);
    std::fs::remove_dir_all(&base_dir).unwrap();
}

#[test]
fn urlencoded_end_to_end() {
    use httpwire::multipart::UrlEncodedDecoder;

    let mut encoder = FormEncoder::urlencoded(&Method::Post, EncoderMode::Rfc1738).unwrap();
    encoder.add_attribute("greeting", "hello world").unwrap();
    encoder.add_attribute("sym", "a=b&c").unwrap();
    let (content_type, body) = encode_form(&mut encoder);
    assert_eq!(content_type, "application/x-www-form-urlencoded");

    let mut decoder = UrlEncodedDecoder::new(MultipartConfig::default());
    decoder
        .offer(&HttpObject::Chunk(Bytes::from(body)))
        .unwrap();
    decoder.offer(&HttpObject::Last(HeaderMap::new())).unwrap();

    let mut attr = decoder.next().unwrap();
    assert_eq!(attr.name(), "greeting");
    assert_eq!(attr.string().unwrap(), "hello world");
    let mut attr = decoder.next().unwrap();
    assert_eq!(attr.name(), "sym");
    assert_eq!(attr.string().unwrap(), "a=b&c");
}

fn rand_token() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    now.as_nanos() as u64 ^ (std::process::id() as u64) << 32
}
