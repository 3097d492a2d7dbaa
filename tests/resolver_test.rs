//! Resolver state machine tests against an instrumented backend and watch.
//!
//! Every backend and watch call is appended to a shared event log so the
//! tests can check ordering, not just outcomes.

use hickory_resolver::proto::op::Message;
use hickory_resolver::proto::rr::rdata::SRV;
use hickory_resolver::proto::rr::{Name, RData, Record};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use xmppconnect::base::neterror::NetError;
use xmppconnect::dns::{
    AddressHints, AsyncDnsBackend, PollStatus, QueryId, Resolver, ResolverRequest, ResolverResult,
    ResolverState, CLASS_IN, TYPE_SRV,
};
use xmppconnect::socket::{IoWatch, WatchId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Open,
    AddWatch(RawFd),
    RemoveWatch,
    SubmitHost(String),
    SubmitService(String, u16, u16),
    Cancel(QueryId),
    Close,
    Deliver(&'static str),
}

#[derive(Default)]
struct World {
    log: Vec<Event>,
    next_id: u64,
    ready: VecDeque<QueryId>,
    addresses: Vec<SocketAddr>,
    raw: Vec<u8>,
    fail_open: bool,
    fail_watch: bool,
}

type Shared = Rc<RefCell<World>>;

struct FakeBackend(Shared);

impl AsyncDnsBackend for FakeBackend {
    fn readiness_fd(&self) -> RawFd {
        7
    }

    fn submit_host_query(&mut self, hostname: &str, hints: AddressHints) -> Result<QueryId, NetError> {
        assert_eq!(hints, AddressHints::tcp());
        let mut w = self.0.borrow_mut();
        w.log.push(Event::SubmitHost(hostname.to_string()));
        w.next_id += 1;
        Ok(QueryId::new(w.next_id))
    }

    fn submit_service_query(
        &mut self,
        dns_name: &str,
        record_class: u16,
        record_type: u16,
    ) -> Result<QueryId, NetError> {
        let mut w = self.0.borrow_mut();
        w.log.push(Event::SubmitService(dns_name.to_string(), record_class, record_type));
        w.next_id += 1;
        Ok(QueryId::new(w.next_id))
    }

    fn poll(&mut self) -> PollStatus {
        match self.0.borrow_mut().ready.pop_front() {
            Some(id) => PollStatus::Ready(id),
            None => PollStatus::Pending,
        }
    }

    fn fetch_host_result(&mut self, _id: QueryId) -> Result<Vec<SocketAddr>, NetError> {
        Ok(self.0.borrow().addresses.clone())
    }

    fn fetch_raw_result(&mut self, _id: QueryId) -> Result<Vec<u8>, NetError> {
        Ok(self.0.borrow().raw.clone())
    }

    fn cancel(&mut self, id: QueryId) {
        self.0.borrow_mut().log.push(Event::Cancel(id));
    }

    fn close(&mut self) {
        self.0.borrow_mut().log.push(Event::Close);
    }
}

struct FakeWatch(Shared);

impl IoWatch for FakeWatch {
    fn add_read_watch(&mut self, fd: RawFd) -> Result<WatchId, NetError> {
        let mut w = self.0.borrow_mut();
        w.log.push(Event::AddWatch(fd));
        if w.fail_watch {
            return Err(NetError::SocketNotConnected);
        }
        Ok(WatchId::new(1))
    }

    fn remove_watch(&mut self, _id: WatchId) {
        self.0.borrow_mut().log.push(Event::RemoveWatch);
    }
}

fn label(result: &ResolverResult) -> &'static str {
    match result {
        ResolverResult::Addresses(_) => "addresses",
        ResolverResult::Service { .. } => "service",
        ResolverResult::Failed(_) => "failed",
        ResolverResult::Cancelled => "cancelled",
    }
}

fn resolver(
    world: &Shared,
    results: &Rc<RefCell<Vec<ResolverResult>>>,
) -> Resolver<FakeBackend, FakeWatch> {
    let opener = world.clone();
    let sink = world.clone();
    let results = results.clone();
    Resolver::new(
        move || {
            opener.borrow_mut().log.push(Event::Open);
            if opener.borrow().fail_open {
                return Err(NetError::DnsInitFailed);
            }
            Ok(FakeBackend(opener.clone()))
        },
        FakeWatch(world.clone()),
        move |result| {
            sink.borrow_mut().log.push(Event::Deliver(label(&result)));
            results.borrow_mut().push(result);
        },
    )
}

fn srv_answer(entries: &[(u16, u16, u16, &str)]) -> Vec<u8> {
    let owner = Name::from_ascii("_xmpp-client._tcp.example.com.").unwrap();
    let mut message = Message::new();
    for (priority, weight, port, target) in entries {
        message.add_answer(Record::from_rdata(
            owner.clone(),
            300,
            RData::SRV(SRV::new(*priority, *weight, *port, Name::from_ascii(target).unwrap())),
        ));
    }
    message.to_vec().unwrap()
}

#[test]
fn test_host_lookup_releases_before_delivery() {
    let world = Shared::default();
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 0);
    world.borrow_mut().addresses = vec![addr];
    let results = Rc::new(RefCell::new(Vec::new()));

    let mut r = resolver(&world, &results);
    r.start(ResolverRequest::host("chat.example.com"));
    assert_eq!(r.state(), ResolverState::Querying);

    // spurious wakeup
    assert_eq!(r.on_readable(), ResolverState::Querying);

    world.borrow_mut().ready.push_back(QueryId::new(1));
    assert_eq!(r.on_readable(), ResolverState::Done);

    assert_eq!(
        world.borrow().log,
        vec![
            Event::Open,
            Event::AddWatch(7),
            Event::SubmitHost("chat.example.com".into()),
            Event::RemoveWatch,
            Event::Close,
            Event::Deliver("addresses"),
        ]
    );
    match &results.borrow()[..] {
        [ResolverResult::Addresses(addrs)] => assert_eq!(addrs, &vec![addr]),
        other => panic!("unexpected results: {:?}", other),
    }
}

#[test]
fn test_empty_address_list_fails() {
    let world = Shared::default();
    let results = Rc::new(RefCell::new(Vec::new()));

    let mut r = resolver(&world, &results);
    r.start(ResolverRequest::host("nowhere.example.com"));
    world.borrow_mut().ready.push_back(QueryId::new(1));
    assert_eq!(r.on_readable(), ResolverState::Failed);
    assert!(matches!(
        results.borrow()[0],
        ResolverResult::Failed(NetError::NameNotResolved)
    ));
}

#[test]
fn test_service_lookup_picks_lowest_priority() {
    let world = Shared::default();
    world.borrow_mut().raw = srv_answer(&[
        (20, 0, 5269, "backup.example.com."),
        (10, 0, 5222, "primary.example.com."),
    ]);
    let results = Rc::new(RefCell::new(Vec::new()));

    let mut r = resolver(&world, &results);
    r.start(ResolverRequest::service("example.com", "xmpp-client", "tcp"));
    assert!(world.borrow().log.contains(&Event::SubmitService(
        "_xmpp-client._tcp.example.com".into(),
        CLASS_IN,
        TYPE_SRV
    )));

    world.borrow_mut().ready.push_back(QueryId::new(1));
    assert_eq!(r.on_readable(), ResolverState::Done);
    match &results.borrow()[..] {
        [ResolverResult::Service { host, port }] => {
            assert_eq!(host, "primary.example.com");
            assert_eq!(*port, 5222);
        }
        other => panic!("unexpected results: {:?}", other),
    }
    let log = world.borrow().log.clone();
    assert_eq!(&log[log.len() - 2..], &[Event::Close, Event::Deliver("service")]);
}

#[test]
fn test_service_lookup_with_bad_answers() {
    for raw in [Vec::new(), vec![0xff; 3]] {
        let world = Shared::default();
        world.borrow_mut().raw = raw;
        let results = Rc::new(RefCell::new(Vec::new()));

        let mut r = resolver(&world, &results);
        r.start(ResolverRequest::service("example.com", "xmpp-client", "tcp"));
        world.borrow_mut().ready.push_back(QueryId::new(1));
        assert_eq!(r.on_readable(), ResolverState::Failed);
        assert_eq!(results.borrow().len(), 1);
        assert!(matches!(results.borrow()[0], ResolverResult::Failed(_)));
    }
}

#[test]
fn test_cancel_suppresses_late_completion() {
    let world = Shared::default();
    world.borrow_mut().addresses = vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)];
    let results = Rc::new(RefCell::new(Vec::new()));

    let mut r = resolver(&world, &results);
    r.start(ResolverRequest::host("chat.example.com"));
    r.cancel();
    assert_eq!(r.state(), ResolverState::Cancelled);

    // the backend reports the cancelled query anyway
    world.borrow_mut().ready.push_back(QueryId::new(1));
    assert_eq!(r.on_readable(), ResolverState::Cancelled);
    r.cancel();

    assert_eq!(results.borrow().len(), 1);
    assert!(matches!(results.borrow()[0], ResolverResult::Cancelled));

    let log = world.borrow().log.clone();
    assert_eq!(
        &log[3..],
        &[
            Event::Cancel(QueryId::new(1)),
            Event::RemoveWatch,
            Event::Close,
            Event::Deliver("cancelled"),
        ]
    );
}

#[test]
fn test_cancel_when_idle_is_noop() {
    let world = Shared::default();
    let results = Rc::new(RefCell::new(Vec::new()));
    let mut r = resolver(&world, &results);
    r.cancel();
    assert_eq!(r.state(), ResolverState::Idle);
    assert!(results.borrow().is_empty());
    assert!(world.borrow().log.is_empty());
}

#[test]
fn test_open_failure_is_delivered() {
    let world = Shared::default();
    world.borrow_mut().fail_open = true;
    let results = Rc::new(RefCell::new(Vec::new()));

    let mut r = resolver(&world, &results);
    r.start(ResolverRequest::host("chat.example.com"));
    assert_eq!(r.state(), ResolverState::Failed);
    assert!(matches!(
        results.borrow()[0],
        ResolverResult::Failed(NetError::DnsInitFailed)
    ));

    // single use
    r.start(ResolverRequest::host("chat.example.com"));
    assert_eq!(results.borrow().len(), 1);
}

#[test]
fn test_watch_failure_closes_backend_then_delivers() {
    let world = Shared::default();
    world.borrow_mut().fail_watch = true;
    let results = Rc::new(RefCell::new(Vec::new()));

    let mut r = resolver(&world, &results);
    r.start(ResolverRequest::service("example.com", "xmpp-client", "tcp"));

    assert_eq!(r.state(), ResolverState::Failed);
    assert!(r.watch_id().is_none());
    assert_eq!(
        world.borrow().log,
        vec![
            Event::Open,
            Event::AddWatch(7),
            Event::Close,
            Event::Deliver("failed"),
        ]
    );
    assert_eq!(results.borrow().len(), 1);
    assert!(matches!(
        results.borrow()[0],
        ResolverResult::Failed(NetError::DnsInitFailed)
    ));

    drop(r);
    assert_eq!(world.borrow().log.len(), 4);
}

#[test]
fn test_drop_while_querying_cancels() {
    let world = Shared::default();
    let results = Rc::new(RefCell::new(Vec::new()));
    {
        let mut r = resolver(&world, &results);
        r.start(ResolverRequest::host("chat.example.com"));
    }
    assert!(matches!(results.borrow()[..], [ResolverResult::Cancelled]));
    assert!(world.borrow().log.contains(&Event::Close));
}
