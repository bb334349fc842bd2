use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;

use zoomrs_engine::proto::{encode_frame, Frame, FrameParser};
use zoomrs_engine::{
    drive, Channel, Connection, EventKind, OpState, Query, RecvState, ZoomError, ZoomResult,
};

/// Scripted in-process peer: answers every request as soon as it is
/// written, so a drive step observes the response on its next read.
struct FakeTarget {
    parser: FrameParser,
    inbound: BytesMut,
    outbound: BytesMut,
    hits: u64,
    records: Vec<Vec<u8>>,
    terms: Vec<(String, u64, String)>,
    search_diag: Option<(i32, String, String, String)>,
    /// When false, requests are swallowed and never answered.
    respond: bool,
    seen: Arc<Mutex<Vec<Frame>>>,
}

impl FakeTarget {
    fn new() -> Self {
        FakeTarget {
            parser: FrameParser::new(),
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            hits: 0,
            records: Vec::new(),
            terms: Vec::new(),
            search_diag: None,
            respond: true,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_records(records: &[&str]) -> Self {
        let mut target = FakeTarget::new();
        target.hits = records.len() as u64;
        target.records = records.iter().map(|r| r.as_bytes().to_vec()).collect();
        target
    }

    fn reply(&mut self, parts: &[&[u8]]) {
        encode_frame(parts, &mut self.outbound);
    }

    fn handle(&mut self, frame: Frame) {
        self.seen.lock().unwrap().push(frame.clone());
        if !self.respond {
            return;
        }
        match frame[0].as_slice() {
            b"INIT" => self.reply(&[b"INITED"]),
            b"SEARCH" => {
                if let Some((code, message, addinfo, diagset)) = self.search_diag.clone() {
                    self.reply(&[
                        b"DIAG",
                        code.to_string().as_bytes(),
                        message.as_bytes(),
                        addinfo.as_bytes(),
                        diagset.as_bytes(),
                    ]);
                } else {
                    self.reply(&[b"HITS", self.hits.to_string().as_bytes()]);
                }
            }
            b"SORT" => {
                // Reversing is enough to observe a changed order.
                self.records.reverse();
                self.reply(&[b"HITS", self.hits.to_string().as_bytes()]);
            }
            b"PRESENT" => {
                let start: usize = String::from_utf8_lossy(&frame[2]).parse().unwrap();
                let count: usize = String::from_utf8_lossy(&frame[3]).parse().unwrap();
                let syntax = frame[4].clone();
                let from = start - 1;
                let to = (from + count).min(self.records.len());
                let mut parts: Vec<Vec<u8>> = vec![
                    b"RECS".to_vec(),
                    start.to_string().into_bytes(),
                    syntax,
                ];
                parts.extend(self.records[from..to].iter().cloned());
                let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
                self.reply(&refs);
            }
            b"SCAN" => {
                let number: usize = String::from_utf8_lossy(&frame[2]).parse().unwrap();
                let mut parts: Vec<Vec<u8>> = vec![b"TERMS".to_vec()];
                for (term, occurrences, display) in self.terms.iter().take(number) {
                    parts.push(term.clone().into_bytes());
                    parts.push(occurrences.to_string().into_bytes());
                    parts.push(display.clone().into_bytes());
                }
                let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
                self.reply(&refs);
            }
            b"ES" => self.reply(&[b"ESOK"]),
            b"CLOSE" => {}
            other => panic!("unexpected verb {:?}", String::from_utf8_lossy(other)),
        }
    }
}

impl Channel for FakeTarget {
    fn send(&mut self, data: &[u8]) -> ZoomResult<usize> {
        self.inbound.extend_from_slice(data);
        while let Some(frame) = self.parser.parse(&mut self.inbound)? {
            self.handle(frame);
        }
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut BytesMut) -> ZoomResult<RecvState> {
        if self.outbound.is_empty() {
            return Ok(RecvState::WouldBlock);
        }
        let taken = self.outbound.split();
        buf.extend_from_slice(&taken);
        Ok(RecvState::Data(taken.len()))
    }

    fn poll(&mut self, timeout: Duration) -> bool {
        if self.outbound.is_empty() {
            thread::sleep(timeout);
        }
        !self.outbound.is_empty()
    }

    fn close(&mut self) {}
}

fn open_with(target: FakeTarget) -> (Connection, Arc<Mutex<Vec<Frame>>>) {
    let seen = target.seen.clone();
    let conn = Connection::new();
    conn.connect_with(Box::new(target));
    (conn, seen)
}

fn settle(conn: &Connection, done: impl Fn() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        if drive(&[conn]).is_none() {
            return;
        }
    }
    panic!("operation did not settle");
}

fn verbs(seen: &Arc<Mutex<Vec<Frame>>>) -> Vec<String> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|f| String::from_utf8_lossy(&f[0]).into_owned())
        .collect()
}

#[test]
fn search_completes_and_reports_hits() {
    let (conn, _) = open_with(FakeTarget::with_records(&["alpha", "beta", "gamma"]));
    let query = Query::from_prefix("@attr 1=4 dog").unwrap();
    let rs = conn.search(&query).unwrap();
    assert_eq!(rs.state(), OpState::Pending);

    settle(&conn, || rs.state() != OpState::Pending);
    assert_eq!(rs.state(), OpState::Ready);
    assert_eq!(rs.size(), 3);
    assert!(conn.last_error().is_ok());
}

#[test]
fn first_drive_reports_connect() {
    let (conn, _) = open_with(FakeTarget::new());
    assert_eq!(drive(&[&conn]), Some((0, EventKind::Connect)));
    assert_eq!(conn.last_event(), EventKind::Connect);
}

#[test]
fn record_cache_is_coherent() {
    let (conn, _) = open_with(FakeTarget::with_records(&["alpha", "beta", "gamma"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();

    let fetched = rs.get_record(1).unwrap().expect("record present");
    let cached = rs.get_record_immediate(1).expect("record cached");
    assert_eq!(fetched.get("raw"), cached.get("raw"));
    assert_eq!(&fetched.get("raw").unwrap()[..], b"alpha");
}

#[test]
fn immediate_get_never_touches_the_network() {
    let (conn, seen) = open_with(FakeTarget::with_records(&["alpha", "beta"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    settle(&conn, || rs.state() != OpState::Pending);
    while drive(&[&conn]).is_some() {}
    let traffic_before = verbs(&seen).len();

    assert!(rs.get_record_immediate(1).is_none());
    assert!(rs.get_record_immediate(2).is_none());

    // No request went out and no event was queued.
    assert_eq!(verbs(&seen).len(), traffic_before);
    assert_eq!(drive(&[&conn]), None);
}

#[test]
fn fetch_populates_the_whole_window() {
    let (conn, seen) = open_with(FakeTarget::with_records(&[
        "r1", "r2", "r3", "r4", "r5",
    ]));
    conn.option_set("fetchWindow", "3");
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();

    rs.get_record(1).unwrap().expect("record present");
    assert!(rs.get_record_immediate(2).is_some());
    assert!(rs.get_record_immediate(3).is_some());
    assert!(rs.get_record_immediate(4).is_none());

    // One SEARCH, one PRESENT; the window amortized the round-trip.
    let verbs = verbs(&seen);
    assert_eq!(
        verbs.iter().filter(|v| v.as_str() == "PRESENT").count(),
        1
    );
}

#[test]
fn out_of_range_position_is_absent_not_an_error() {
    let (conn, _) = open_with(FakeTarget::with_records(&["only"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    settle(&conn, || rs.state() != OpState::Pending);

    assert!(rs.get_record(0).unwrap().is_none());
    assert!(rs.get_record(7).unwrap().is_none());
}

#[test]
fn sort_clears_cached_positions() {
    let (conn, _) = open_with(FakeTarget::with_records(&["alpha", "beta", "gamma"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    rs.get_record(1).unwrap().expect("record present");
    rs.get_record(2).unwrap().expect("record present");

    rs.sort("title ascending").unwrap();

    // Cleared before any new fetch happened; the hit count is pending
    // again until the server reports the sorted set.
    assert!(rs.get_record_immediate(1).is_none());
    assert!(rs.get_record_immediate(2).is_none());
    assert_eq!(rs.state(), OpState::Pending);
    assert_eq!(rs.size(), 0);

    // After the sorted search completes, position 1 maps to a new record.
    let first = rs.get_record(1).unwrap().expect("record present");
    assert_eq!(&first.get("raw").unwrap()[..], b"gamma");
    assert_eq!(rs.size(), 3);
}

#[test]
fn invalid_sort_criteria_fail_eagerly() {
    let (conn, seen) = open_with(FakeTarget::with_records(&["alpha"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    settle(&conn, || rs.state() != OpState::Pending);

    let err = rs.sort("title sideways").unwrap_err();
    assert!(matches!(err, ZoomError::Network { .. }));
    assert!(!verbs(&seen).contains(&"SORT".to_owned()));
}

#[test]
fn reset_cache_keeps_server_side_set() {
    let (conn, _) = open_with(FakeTarget::with_records(&["alpha", "beta"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    rs.get_record(1).unwrap().expect("record present");

    rs.reset_cache();
    assert!(rs.get_record_immediate(1).is_none());
    assert_eq!(rs.size(), 2);
    // Refetch works against the same set.
    assert!(rs.get_record(1).unwrap().is_some());
}

#[test]
fn close_cancels_pending_operations() {
    let mut target = FakeTarget::new();
    target.respond = false;
    let (conn, _) = open_with(target);

    let first = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    let second = conn.search(&Query::from_prefix("cat").unwrap()).unwrap();
    drive(&[&conn]);

    conn.close();
    assert_eq!(first.state(), OpState::Cancelled);
    assert_eq!(second.state(), OpState::Cancelled);
    assert!(matches!(first.get_record(1), Err(ZoomError::Cancelled)));

    let err = conn.search(&Query::from_prefix("bird").unwrap()).unwrap_err();
    assert_eq!(err, ZoomError::ConnectionClosed);
    assert!(conn.scan("dog").is_err());

    // Idempotent.
    conn.close();
    assert!(conn.is_closed());
}

#[test]
fn cloned_record_outlives_its_result_set() {
    let (conn, _) = open_with(FakeTarget::with_records(&["alpha"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();

    let record = rs.get_record(1).unwrap().expect("record present");
    let copy = record.clone();
    rs.destroy();

    assert_eq!(&copy.get("raw").unwrap()[..], b"alpha");
}

#[test]
fn idle_drive_is_a_no_op() {
    let (conn, _) = open_with(FakeTarget::with_records(&["alpha"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    settle(&conn, || rs.state() != OpState::Pending);
    while drive(&[&conn]).is_some() {}

    assert_eq!(drive(&[&conn]), None);
    assert_eq!(drive(&[&conn]), None);
    assert_eq!(rs.size(), 1);
}

#[test]
fn handles_format_with_their_state() {
    let (conn, _) = open_with(FakeTarget::with_records(&["alpha"]));
    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    settle(&conn, || rs.state() != OpState::Pending);

    let shown = format!("{rs:?}");
    assert!(shown.contains("ResultSet"));
    assert!(shown.contains("Ready"));

    let pkg = conn.package("update").unwrap();
    assert!(format!("{pkg:?}").contains("Built"));
}

#[test]
fn search_before_connect_is_an_illegal_state() {
    let conn = Connection::new();
    let err = conn.search(&Query::from_prefix("dog").unwrap()).unwrap_err();
    assert!(matches!(err, ZoomError::IllegalState(_)));
}

#[test]
fn server_diagnostic_fails_the_search() {
    let mut target = FakeTarget::new();
    target.search_diag = Some((
        109,
        "Database unavailable".to_owned(),
        "marc".to_owned(),
        "Bib-1".to_owned(),
    ));
    let (conn, _) = open_with(target);

    let rs = conn.search(&Query::from_prefix("dog").unwrap()).unwrap();
    settle(&conn, || rs.state() != OpState::Pending);

    assert_eq!(rs.state(), OpState::Failed);
    let last = conn.last_error();
    assert_eq!(last.code, 109);
    assert_eq!(last.diagset, "Bib-1");
    match rs.get_record(1) {
        Err(ZoomError::Protocol { code, addinfo, .. }) => {
            assert_eq!(code, 109);
            assert_eq!(addinfo, "marc");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn scan_returns_paged_terms() {
    let mut target = FakeTarget::new();
    target.terms = vec![
        ("dog".to_owned(), 12, "Dog".to_owned()),
        ("doge".to_owned(), 3, "Doge".to_owned()),
        ("dogma".to_owned(), 7, "Dogma".to_owned()),
    ];
    let (conn, _) = open_with(target);
    conn.option_set("number", "2");

    let scan = conn.scan("dog").unwrap();
    let first = scan.term(1).unwrap();
    assert_eq!(first.term, "dog");
    assert_eq!(first.occurrences, 12);
    assert_eq!(first.display, "Dog");

    // The server honored the requested page size.
    assert_eq!(scan.size(), 2);
    match scan.term(3) {
        Err(ZoomError::IndexOutOfRange { pos, size }) => {
            assert_eq!(pos, 3);
            assert_eq!(size, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn package_sends_exactly_once() {
    let (conn, seen) = open_with(FakeTarget::new());

    let pkg = conn.package("update").unwrap();
    pkg.option_set("recordIdNumber", "42");
    pkg.option_set("action", "recordInsert");
    assert!(!pkg.is_sent());
    assert_eq!(pkg.state(), OpState::Built);

    pkg.send().unwrap();
    settle(&conn, || pkg.state() == OpState::Ready);
    assert_eq!(pkg.state(), OpState::Ready);

    // The request carried the package's own options.
    let frames = seen.lock().unwrap();
    let es = frames
        .iter()
        .find(|f| f[0] == b"ES".to_vec())
        .expect("ES frame sent");
    assert_eq!(es[1], b"update".to_vec());
    assert!(es.contains(&b"recordIdNumber".to_vec()));
    assert!(es.contains(&b"42".to_vec()));
    drop(frames);

    let err = pkg.send().unwrap_err();
    assert!(matches!(err, ZoomError::IllegalState(_)));
}

#[test]
fn package_options_inherit_from_connection() {
    let (conn, _) = open_with(FakeTarget::new());
    conn.option_set("user", "admin");

    let pkg = conn.package("update").unwrap();
    assert_eq!(pkg.option_get("user").as_deref(), Some("admin"));
    // Locally set values shadow without touching the connection.
    pkg.option_set("user", "editor");
    assert_eq!(pkg.option_get("user").as_deref(), Some("editor"));
    assert_eq!(conn.option_get("user").as_deref(), Some("admin"));
}

#[test]
fn two_connections_complete_independently() {
    let (quick, _) = open_with(FakeTarget::with_records(&["fast"]));
    let mut slow_target = FakeTarget::new();
    slow_target.respond = false;
    let (slow, _) = open_with(slow_target);

    let rs_quick = quick.search(&Query::from_prefix("dog").unwrap()).unwrap();
    let rs_slow = slow.search(&Query::from_prefix("dog").unwrap()).unwrap();

    for _ in 0..50 {
        if rs_quick.state() == OpState::Ready {
            break;
        }
        drive(&[&slow, &quick]);
    }
    assert_eq!(rs_quick.state(), OpState::Ready);
    assert_eq!(rs_slow.state(), OpState::Pending);
    slow.close();
    assert_eq!(rs_slow.state(), OpState::Cancelled);
}

// ---- real TCP end-to-end -----------------------------------------------

fn spawn_tcp_target(records: Vec<&'static [u8]>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        loop {
            let frame = match read_frame(&mut reader) {
                Ok(Some(frame)) => frame,
                _ => return,
            };
            let mut out = BytesMut::new();
            match frame[0].as_slice() {
                b"INIT" => encode_frame(&[b"INITED"], &mut out),
                b"SEARCH" => {
                    encode_frame(&[b"HITS", records.len().to_string().as_bytes()], &mut out)
                }
                b"PRESENT" => {
                    let start: usize =
                        String::from_utf8_lossy(&frame[2]).parse().expect("start");
                    let count: usize =
                        String::from_utf8_lossy(&frame[3]).parse().expect("count");
                    let to = (start - 1 + count).min(records.len());
                    let mut parts: Vec<&[u8]> = vec![b"RECS", frame[2].as_slice(), b"raw"];
                    for record in &records[start - 1..to] {
                        parts.push(record);
                    }
                    encode_frame(&parts, &mut out);
                }
                b"CLOSE" => return,
                other => panic!("unexpected verb {:?}", String::from_utf8_lossy(other)),
            }
            stream.write_all(&out).expect("write");
        }
    });

    addr
}

fn read_frame(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Frame>> {
    let Some(count) = read_sized(reader, b'*')? else {
        return Ok(None);
    };
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_sized(reader, b'$')?
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "missing crlf",
            ));
        }
        parts.push(data);
    }
    Ok(Some(parts))
}

fn read_sized(reader: &mut BufReader<TcpStream>, marker: u8) -> std::io::Result<Option<usize>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.len() < 3 || line[0] != marker || line[line.len() - 2] != b'\r' {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bad header",
        ));
    }
    let digits = String::from_utf8_lossy(&line[1..line.len() - 2]).into_owned();
    digits
        .parse()
        .map(Some)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad length"))
}

#[test]
fn tcp_end_to_end_search_and_fetch() {
    let addr = spawn_tcp_target(vec![b"first record", b"second record"]);
    let (host, port) = addr.rsplit_once(':').expect("addr");

    let conn = Connection::new();
    conn.option_set("timeout", "5");
    conn.connect(host, port.parse().expect("port"));
    assert!(conn.last_error().is_ok());

    let rs = conn.search(&Query::from_prefix("@attr 1=4 dog").unwrap()).unwrap();
    let record = rs.get_record(2).unwrap().expect("record present");
    assert_eq!(&record.get("raw").unwrap()[..], b"second record");
    assert_eq!(rs.size(), 2);

    conn.close();
    assert!(conn.is_closed());
}

#[test]
fn tcp_connect_failure_is_recorded_not_thrown() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let conn = Connection::new();
    conn.option_set("timeout", "1");
    conn.connect("127.0.0.1", addr.port());

    let last = conn.last_error();
    assert!(!last.is_ok());
    assert_eq!(last.code, zoomrs_engine::diag::ERROR_CONNECT);
    assert!(conn.search(&Query::from_prefix("dog").unwrap()).is_err());
}
