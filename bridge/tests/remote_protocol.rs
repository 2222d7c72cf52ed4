//! End-to-end: a scripted amplifier on an in-memory serial link, the real
//! driver and remote-protocol server, and a real TCP client.

use std::sync::Arc;
use std::time::Duration;

use kbridge::device::Device;
use kbridge::driver::Driver;
use kbridge::kpa500::KPA500;
use kbridge::remote::{self, Credentials};
use tokio::io::{
    AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWriteExt as _, BufReader,
    DuplexStream,
};
use tokio::net::{TcpListener, TcpStream};

/// A KPA500 that is connected and powered on. Band and operate state are
/// live so set commands are visible in later polls.
fn fake_amplifier(mut port: DuplexStream) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut band = "00".to_owned();
        let mut operate = "0".to_owned();
        let mut pending = String::new();
        let mut buffer = [0u8; 64];

        loop {
            let read = match port.read(&mut buffer).await {
                Ok(0) | Err(_) => return,
                Ok(read) => read,
            };
            pending.push_str(&String::from_utf8_lossy(&buffer[..read]));

            while let Some(end) = pending.find(';') {
                let command: String = pending.drain(..=end).collect();
                let reply: Option<Vec<u8>> = match command.as_str() {
                    ";" => Some(b";".to_vec()),
                    "^ON;" => Some(b"^ON1;".to_vec()),
                    "^RVM;" => Some(b"^RVM01.54;".to_vec()),
                    "^SN;" => Some(b"^SN00677;".to_vec()),
                    "^FC;" => Some(b"^FC2;".to_vec()),
                    "^FL;" => Some(b"^FL00;".to_vec()),
                    "^WS;" => Some(b"^WS000 000;".to_vec()),
                    "^VI;" => Some(b"^VI58 000;".to_vec()),
                    "^TM;" => Some(b"^TM030;".to_vec()),
                    "^SP;" => Some(b"^SP0;".to_vec()),
                    "^OS;" => Some(format!("^OS{operate};").into_bytes()),
                    "^BN;" => Some(format!("^BN{band};").into_bytes()),
                    "^OS1;" => {
                        operate = "1".to_owned();
                        None
                    }
                    "^OS0;" => {
                        operate = "0".to_owned();
                        None
                    }
                    set if set.starts_with("^BN") => {
                        band = set[3..set.len() - 1].to_owned();
                        // Band sets are echoed.
                        Some(set.as_bytes().to_vec())
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    if port.write_all(&reply).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

async fn start_bridge(device: Arc<Device>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local addr");
    let credentials = Arc::new(Credentials {
        username: "operator".to_owned(),
        password: "secret".to_owned(),
    });
    tokio::spawn(remote::listen(listener, device, credentials));
    address
}

async fn expect_line<R>(reader: &mut BufReader<R>, wanted: &str)
where
    R: AsyncRead + Unpin,
{
    expect_lines(reader, &[wanted]).await;
}

/// Reads frames until every wanted line has been seen, in any order.
///
/// Lines that reflect a value the driver set before the client subscribed
/// arrive inside the snapshot burst, later changes arrive as deltas; the
/// relative order of unrelated keys is therefore not fixed.
async fn expect_lines<R>(reader: &mut BufReader<R>, wanted: &[&str])
where
    R: AsyncRead + Unpin,
{
    let mut outstanding: Vec<&str> = wanted.to_vec();
    tokio::time::timeout(Duration::from_secs(30), async {
        while !outstanding.is_empty() {
            let mut line = String::new();
            let read = reader.read_line(&mut line).await.expect("read line");
            assert!(read > 0, "connection closed while waiting for {outstanding:?}");
            outstanding.retain(|wanted| *wanted != line.trim());
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

#[tokio::test]
async fn remote_client_observes_and_controls_the_amplifier() {
    let device = Arc::new(Device::new(&KPA500));
    let (serial, port) = tokio::io::duplex(256);
    let fake = fake_amplifier(port);
    let driver = tokio::spawn(Driver::new(device.clone(), serial).run());

    let address = start_bridge(device.clone()).await;
    let stream = TcpStream::connect(address).await.expect("connect");
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    writer
        .write_all(b"server::login::operator::secret\n")
        .await
        .expect("send login");
    expect_line(&mut reader, "server::login::valid").await;

    // The driver finds the powered amplifier and identity data streams in.
    expect_lines(
        &mut reader,
        &["amp::fault::AMP ON", "amp::firmware::01.54", "amp::serial::00677"],
    )
    .await;

    // Band change round trip: control line, queued command, device reply,
    // delta back to this client.
    writer
        .write_all(b"amp::dropdown::Band::20m\n")
        .await
        .expect("send band change");
    expect_line(&mut reader, "amp::dropdown::Band::20m").await;

    // Operate toggle updates OPER and its inverse STBY.
    writer
        .write_all(b"amp::button::OPER::1\n")
        .await
        .expect("send operate");
    expect_line(&mut reader, "amp::button::OPER::1").await;
    expect_line(&mut reader, "amp::button::STBY::0").await;

    driver.abort();
    fake.abort();
}

#[tokio::test]
async fn absent_amplifier_reports_the_synthetic_fault_to_clients() {
    let device = Arc::new(Device::new(&KPA500));
    // The far end of the serial link stays open but never answers.
    let (serial, _port) = tokio::io::duplex(256);
    let driver = tokio::spawn(Driver::new(device.clone(), serial).run());

    let address = start_bridge(device.clone()).await;
    let stream = TcpStream::connect(address).await.expect("connect");
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    writer
        .write_all(b"server::login::operator::secret\n")
        .await
        .expect("send login");
    expect_line(&mut reader, "server::login::valid").await;

    expect_lines(&mut reader, &["amp::fault::NO AMP", "amp::button::PWR::0"]).await;

    driver.abort();
}
