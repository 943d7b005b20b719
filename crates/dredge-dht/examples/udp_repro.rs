use tokio::net::UdpSocket;

#[tokio::main]
async fn main() {
    let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = sock.local_addr().unwrap();
    println!("bound {addr}");

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 512];
        let (len, from) = sock.recv_from(&mut buf).await.unwrap();
        println!("received {len} bytes from {from}");
    });

    std::thread::sleep(std::time::Duration::from_millis(50));

    let prober = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    prober.send_to(b"hello", addr).unwrap();
    println!("sent");

    tokio::time::timeout(std::time::Duration::from_secs(3), handle)
        .await
        .expect("timed out")
        .unwrap();
}
