use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use dns_types::{Query, RecordType, Response, ResponseBuilder, ResponseCode, records};
use tokio_util::sync::CancellationToken;
use v2router::{BufferedWriter, Handler as _, PlainMatcherBuilder, Router, config};

#[tokio::test]
async fn routes_queries_according_to_the_stanza() {
    let rule_upstream = upstream(Ipv4Addr::new(10, 0, 0, 1)).await;
    let default_upstream = upstream(Ipv4Addr::new(10, 0, 0, 2)).await;

    let stanza = config::Stanza {
        data_path: String::new(),
        directives: vec![
            directive(&format!(
                "forward domain:routed.test to udp://{rule_upstream} retry:2"
            )),
            directive("reject full:blocked.test"),
            directive(&format!("default udp://{default_upstream}")),
        ],
    };

    let (router, shutdown) = config::build(&stanza, &PlainMatcherBuilder).unwrap();

    // Twice: the first query walks the rules, the second hits the match cache
    // and reuses the pooled connection.
    for _ in 0..2 {
        let response = serve(&router, "www.routed.test").await;

        assert_eq!(response.rcode(), ResponseCode::NOERROR);
        assert_eq!(answer_ips(&response), vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
    }

    let response = serve(&router, "blocked.test").await;
    assert_eq!(response.rcode(), ResponseCode::NOERROR);
    assert_eq!(answer_ips(&response), vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)]);

    let response = serve(&router, "elsewhere.test").await;
    assert_eq!(answer_ips(&response), vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))]);

    shutdown.trigger();
}

async fn serve(router: &Router, name: &str) -> Response {
    let query = Query::new(dns_types::domain(name).unwrap(), RecordType::A);
    let mut writer = BufferedWriter::new();

    router
        .serve_dns(&CancellationToken::new(), &mut writer, &query)
        .await
        .unwrap();

    writer.into_response().unwrap()
}

fn directive(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_owned).collect()
}

fn answer_ips(response: &Response) -> Vec<IpAddr> {
    response.records().filter_map(records::extract_ip).collect()
}

/// A resolver stub answering every query with a single A record.
async fn upstream(ip: Ipv4Addr) -> SocketAddr {
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buffer = vec![0u8; 2000];

        loop {
            let Ok((len, from)) = socket.recv_from(&mut buffer).await else {
                return;
            };
            let query = Query::parse(&buffer[..len]).unwrap();

            let response = ResponseBuilder::for_query(&query, ResponseCode::NOERROR)
                .with_records([(query.domain().unwrap(), 60, records::a(ip))])
                .build();

            socket.send_to(response.as_bytes(), from).await.unwrap();
        }
    });

    addr
}
