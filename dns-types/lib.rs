//! Validated wrappers around DNS wire messages.
//!
//! A [`Query`] and a [`Response`] are both backed by a fully-parsed [`Message`].
//! The constructors verify everything the rest of the workspace relies on
//! (direction flag, at most one question, parseable answer records) so that
//! accessors cannot fail later.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use domain::{
    base::{
        Message, MessageBuilder, ParsedName, Question, message_builder::AnswerBuilder,
        name::FlattenInto,
    },
    dep::octseq::OctetsInto,
    rdata::AllRecordData,
};

pub mod prelude {
    // Re-export trait names so other crates can call the functions on them.
    // We don't export the name though so that it cannot conflict.
    pub use domain::base::RecordData as _;
    pub use domain::base::ToName as _;
    pub use domain::base::name::FlattenInto as _;
}

pub type RecordType = domain::base::iana::Rtype;
pub type ResponseCode = domain::base::iana::Rcode;
pub type Ttl = domain::base::Ttl;

pub type DomainName = domain::base::Name<Vec<u8>>;

pub type Record<'a> =
    domain::base::Record<ParsedName<&'a [u8]>, AllRecordData<&'a [u8], ParsedName<&'a [u8]>>>;
pub type RecordData<'a> = AllRecordData<&'a [u8], ParsedName<&'a [u8]>>;

pub type OwnedRecord = domain::base::Record<DomainName, AllRecordData<Vec<u8>, DomainName>>;
pub type OwnedRecordData = AllRecordData<Vec<u8>, DomainName>;

/// Parses a domain name from its presentation format.
pub fn domain(name: &str) -> Result<DomainName, Error> {
    DomainName::vec_from_str(name).map_err(|_| Error::InvalidName)
}

/// A DNS query with at most one question.
///
/// Zero-question queries are representable (they are what the FORMERR path
/// rejects); multi-question queries don't exist in practice and are refused
/// at parse time.
#[derive(Clone)]
pub struct Query {
    inner: Message<Vec<u8>>,
}

impl Query {
    pub fn parse(slice: &[u8]) -> Result<Self, Error> {
        let message = Message::from_octets(slice).map_err(|_| Error::TooShort)?;

        if message.header().qr() {
            return Err(Error::NotAQuery);
        }

        verify_at_most_one_question(&message)?;

        Ok(Self {
            inner: message.octets_into(),
        })
    }

    pub fn new(domain: DomainName, rtype: RecordType) -> Self {
        let mut inner = MessageBuilder::new_vec().question();
        inner.header_mut().set_qr(false);
        inner.header_mut().set_rd(true);
        inner.header_mut().set_random_id();

        inner
            .push((domain, rtype))
            .expect("Vec-backed message builder never fails");

        Self {
            inner: inner.into_message(),
        }
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.inner.header_mut().set_id(id);

        self
    }

    pub fn id(&self) -> u16 {
        self.inner.header().id()
    }

    /// The queried name, or `None` for a query without a question.
    pub fn domain(&self) -> Option<DomainName> {
        Some(self.question()?.into_qname().flatten_into())
    }

    pub fn qtype(&self) -> Option<RecordType> {
        Some(self.question()?.qtype())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_octets()
    }

    #[allow(
        clippy::unwrap_in_result,
        reason = "The question was parse-verified in the constructor."
    )]
    fn question(&self) -> Option<Question<ParsedName<&[u8]>>> {
        let question = self.inner.question().next()?;

        Some(question.expect("verified in ctor"))
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("qid", &self.id())
            .field("domain", &self.domain())
            .field("type", &self.qtype())
            .finish()
    }
}

/// A DNS response with at most one question and parseable answer records.
#[derive(Clone)]
pub struct Response {
    inner: Message<Vec<u8>>,
}

impl Response {
    pub fn parse(slice: &[u8]) -> Result<Self, Error> {
        let message = Message::from_octets(slice).map_err(|_| Error::TooShort)?;

        if !message.header().qr() {
            return Err(Error::NotAResponse);
        }

        verify_at_most_one_question(&message)?;

        // Verify all answer records upfront so `records()` cannot fail.
        for record in message.answer()? {
            record?.into_any_record::<AllRecordData<_, _>>()?;
        }

        Ok(Self {
            inner: message.octets_into(),
        })
    }

    /// An empty "NOERROR" response for the given query.
    pub fn no_error(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::NOERROR).build()
    }

    pub fn servfail(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::SERVFAIL).build()
    }

    pub fn formerr(query: &Query) -> Self {
        ResponseBuilder::for_query(query, ResponseCode::FORMERR).build()
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.inner.header_mut().set_id(id);

        self
    }

    pub fn id(&self) -> u16 {
        self.inner.header().id()
    }

    pub fn domain(&self) -> Option<DomainName> {
        Some(self.question()?.into_qname().flatten_into())
    }

    pub fn rcode(&self) -> ResponseCode {
        self.inner.header().rcode()
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.inner
            .answer()
            .expect("verified in ctor")
            .into_iter()
            .map(|r| {
                r.expect("verified in ctor")
                    .into_any_record::<AllRecordData<_, _>>()
                    .expect("verified in ctor")
            })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_slice()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_octets()
    }

    #[allow(
        clippy::unwrap_in_result,
        reason = "The question was parse-verified in the constructor."
    )]
    fn question(&self) -> Option<Question<ParsedName<&[u8]>>> {
        let question = self.inner.question().next()?;

        Some(question.expect("verified in ctor"))
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("qid", &self.id())
            .field("domain", &self.domain())
            .field("rcode", &self.rcode())
            .finish_non_exhaustive()
    }
}

/// Builds a reply for a query, copying its id and question.
pub struct ResponseBuilder {
    inner: AnswerBuilder<Vec<u8>>,
}

impl ResponseBuilder {
    pub fn for_query(query: &Query, code: ResponseCode) -> Self {
        let inner = MessageBuilder::new_vec()
            .start_answer(&query.inner, code)
            .expect("Vec-backed message builder never fails");

        Self { inner }
    }

    pub fn with_records(mut self, records: impl IntoIterator<Item: Into<OwnedRecord>>) -> Self {
        for record in records {
            self.inner
                .push(record.into())
                .expect("Vec-backed message builder never fails");
        }

        self
    }

    pub fn build(self) -> Response {
        Response {
            inner: self.inner.into_message(),
        }
    }
}

fn verify_at_most_one_question(message: &Message<&[u8]>) -> Result<(), Error> {
    let mut questions = message.question();

    if let Some(question) = questions.next() {
        question?;
    }

    if questions.next().is_some() {
        return Err(Error::MultipleQuestions);
    }

    Ok(())
}

pub mod records {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use domain::rdata::{A, Aaaa};

    use super::*;

    pub fn a(ip: Ipv4Addr) -> OwnedRecordData {
        OwnedRecordData::A(A::new(ip))
    }

    pub fn aaaa(ip: Ipv6Addr) -> OwnedRecordData {
        OwnedRecordData::Aaaa(Aaaa::new(ip))
    }

    #[expect(
        clippy::wildcard_enum_match_arm,
        reason = "We explicitly only want A and AAAA records."
    )]
    pub fn extract_ip(r: Record<'_>) -> Option<IpAddr> {
        match r.into_data() {
            RecordData::A(a) => Some(a.addr().into()),
            RecordData::Aaaa(aaaa) => Some(aaaa.addr().into()),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("byte slice is too short to contain a message")]
    TooShort,
    #[error("DNS message is not a query")]
    NotAQuery,
    #[error("DNS message is not a response")]
    NotAResponse,
    #[error("DNS message has more than one question")]
    MultipleQuestions,
    #[error("invalid domain name")]
    InvalidName,
    #[error(transparent)]
    Parse(#[from] domain::base::wire::ParseError),
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn query_roundtrip() {
        let query = Query::new(domain("example.com").unwrap(), RecordType::A).with_id(42);

        let parsed = Query::parse(&query.clone().into_bytes()).unwrap();

        assert_eq!(parsed.id(), 42);
        assert_eq!(parsed.domain().unwrap(), domain("example.com").unwrap());
        assert_eq!(parsed.qtype().unwrap(), RecordType::A);
    }

    #[test]
    fn query_without_question_has_no_domain() {
        // A bare 12-byte header: qr=0, qdcount=0.
        let query = Query::parse(&[0u8; 12]).unwrap();

        assert_eq!(query.domain(), None);
    }

    #[test]
    fn response_copies_query_id_and_question() {
        let query = Query::new(domain("example.com").unwrap(), RecordType::A).with_id(7);

        let response = Response::no_error(&query);

        assert_eq!(response.id(), 7);
        assert_eq!(response.domain(), query.domain());
        assert_eq!(response.rcode(), ResponseCode::NOERROR);
        assert_eq!(response.records().count(), 0);
    }

    #[test]
    fn response_with_single_a_record() {
        let query = Query::new(domain("blocked.test").unwrap(), RecordType::A);

        let response = ResponseBuilder::for_query(&query, ResponseCode::NOERROR)
            .with_records([(
                query.domain().unwrap(),
                0,
                records::a(Ipv4Addr::UNSPECIFIED),
            )])
            .build();

        let reparsed = Response::parse(response.as_bytes()).unwrap();
        let ips = reparsed
            .records()
            .filter_map(records::extract_ip)
            .collect::<Vec<_>>();

        assert_eq!(ips, vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)]);
    }

    #[test]
    fn rejects_response_as_query() {
        let query = Query::new(domain("example.com").unwrap(), RecordType::A);
        let response = Response::no_error(&query);

        assert!(matches!(
            Query::parse(response.as_bytes()),
            Err(Error::NotAQuery)
        ));
    }

    #[test]
    fn rejects_query_as_response() {
        let query = Query::new(domain("example.com").unwrap(), RecordType::A);

        assert!(matches!(
            Response::parse(query.as_bytes()),
            Err(Error::NotAResponse)
        ));
    }
}
