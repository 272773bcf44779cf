//! Complete example of X3DH + Double Ratchet usage
//!
//! Two users register on the bulletin-board server, establish a session
//! asynchronously, and exchange messages out of order.

use axolotl::{Client, Server};
use rand_core::OsRng;

fn main() {
    println!("=== Secure messaging complete example ===\n");

    let mut server = Server::new();

    println!("1. Generating identities and registering prekey bundles...");
    let mut alice = Client::new(&mut OsRng, "alice");
    let mut bob = Client::new(&mut OsRng, "bob");
    alice.register(&mut OsRng, &mut server);
    bob.register(&mut OsRng, &mut server);
    println!(
        "   Bob published {} one-time prekeys\n",
        server.one_time_prekey_count("bob")
    );

    println!("2. Alice sends while Bob is offline (X3DH handshake)...");
    alice
        .send(&mut OsRng, &mut server, "bob", b"Hi Bob!")
        .expect("send should succeed");
    alice
        .send(&mut OsRng, &mut server, "bob", b"Are you there?")
        .expect("send should succeed");
    println!(
        "   One-time prekeys remaining for Bob: {}\n",
        server.one_time_prekey_count("bob")
    );

    println!("3. Bob comes online and fetches his mailbox...");
    for message in bob.receive(&mut server) {
        println!(
            "   {} -> bob: {}",
            message.from,
            String::from_utf8_lossy(&message.plaintext)
        );
    }
    println!();

    println!("4. Bob replies (DH ratchet turns)...");
    bob.send(&mut OsRng, &mut server, "alice", b"Hi Alice! I'm here.")
        .expect("send should succeed");
    for message in alice.receive(&mut server) {
        println!(
            "   {} -> alice: {}",
            message.from,
            String::from_utf8_lossy(&message.plaintext)
        );
    }
    println!();

    println!("5. A longer conversation...");
    for round in 0..3 {
        let text = format!("alice message {round}");
        alice
            .send(&mut OsRng, &mut server, "bob", text.as_bytes())
            .expect("send should succeed");
    }
    for message in bob.receive(&mut server) {
        println!(
            "   {} -> bob: {}",
            message.from,
            String::from_utf8_lossy(&message.plaintext)
        );
    }

    println!("\nDone.");
}
