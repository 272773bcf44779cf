//! Integration tests for X3DH and both Double Ratchet variants
//!
//! Covers complete protocol flows:
//! - In-order and out-of-order ratchet conversations
//! - Skip bound enforcement
//! - Header-encrypted sessions across DH epochs
//! - Full X3DH handshake through the bulletin-board server

use axolotl::crypto::SymmetricKey;
use axolotl::{
    Client, DoubleRatchet, Error, HeaderRatchet, Incoming, SecretKey, Server, MAX_SKIP,
};
use rand_core::OsRng;

const SK: &[u8; 32] = b"some random key some random key!";
const AD: &[u8] = b"random associated data";

fn ratchet_pair() -> (DoubleRatchet, DoubleRatchet) {
    let alice_kp = SecretKey::generate(&mut OsRng);
    let bob_kp = SecretKey::generate(&mut OsRng);

    let alice = DoubleRatchet::init_initiator(
        SymmetricKey::from_bytes(*SK),
        alice_kp,
        bob_kp.public_key(),
    );
    let bob = DoubleRatchet::init_responder(SymmetricKey::from_bytes(*SK), bob_kp);
    (alice, bob)
}

fn header_ratchet_pair() -> (HeaderRatchet, HeaderRatchet) {
    let alice_kp = SecretKey::generate(&mut OsRng);
    let bob_kp = SecretKey::generate(&mut OsRng);
    let hka = SymmetricKey::from_bytes(*b"initial shared header key alice!");
    let nhkb = SymmetricKey::from_bytes(*b"initial shared header key bob!!!");

    let alice = HeaderRatchet::init_initiator(
        SymmetricKey::from_bytes(*SK),
        hka.clone(),
        nhkb.clone(),
        alice_kp,
        bob_kp.public_key(),
    );
    let bob = HeaderRatchet::init_responder(SymmetricKey::from_bytes(*SK), hka, nhkb, bob_kp);
    (alice, bob)
}

#[test]
fn test_in_order_pair() {
    let (mut alice, mut bob) = ratchet_pair();

    let msg = alice.encrypt(b"Hi Bob!", AD).expect("alice can send first");
    assert_eq!(bob.decrypt(&msg, AD).unwrap(), b"Hi Bob!");

    let reply = bob.encrypt(b"Hi Alice!", AD).unwrap();
    assert_eq!(alice.decrypt(&reply, AD).unwrap(), b"Hi Alice!");
}

#[test]
fn test_single_skip() {
    let (mut alice, mut bob) = ratchet_pair();

    let m1 = alice.encrypt(b"Hi Bob!", AD).unwrap();
    let m2 = alice.encrypt(b"Hi Bob 2!", AD).unwrap();

    assert_eq!(bob.decrypt(&m2, AD).unwrap(), b"Hi Bob 2!");
    assert_eq!(bob.decrypt(&m1, AD).unwrap(), b"Hi Bob!");
}

#[test]
fn test_random_order_of_five() {
    let (mut alice, mut bob) = ratchet_pair();

    let plaintexts: Vec<String> = (1..=5).map(|i| format!("message {i}")).collect();
    let messages: Vec<_> = plaintexts
        .iter()
        .map(|p| alice.encrypt(p.as_bytes(), AD).unwrap())
        .collect();

    for index in [1usize, 4, 3, 2, 0] {
        let plaintext = bob.decrypt(&messages[index], AD).unwrap();
        assert_eq!(plaintext, plaintexts[index].as_bytes());
    }
    assert_eq!(bob.skipped_count(), 0);
}

#[test]
fn test_too_many_skipped() {
    let (mut alice, mut bob) = ratchet_pair();

    let mut last = None;
    for _ in 0..(MAX_SKIP + 2) {
        last = Some(alice.encrypt(b"flood", AD).unwrap());
    }

    assert_eq!(
        bob.decrypt(&last.unwrap(), AD),
        Err(Error::TooManySkipped)
    );
}

#[test]
fn test_skip_at_exact_bound_succeeds() {
    let (mut alice, mut bob) = ratchet_pair();

    // positions 0..MAX_SKIP are cached, position MAX_SKIP decrypts
    let mut last = None;
    for _ in 0..=MAX_SKIP {
        last = Some(alice.encrypt(b"edge", AD).unwrap());
    }

    assert_eq!(bob.decrypt(&last.unwrap(), AD).unwrap(), b"edge");
    assert_eq!(bob.skipped_count(), MAX_SKIP as usize);
}

#[test]
fn test_cross_epoch_skip() {
    let (mut alice, mut bob) = ratchet_pair();

    let a1 = alice.encrypt(b"A1", AD).unwrap();
    bob.decrypt(&a1, AD).unwrap();

    let b1 = bob.encrypt(b"B1", AD).unwrap();
    let b2 = bob.encrypt(b"B2", AD).unwrap();
    let b3 = bob.encrypt(b"B3", AD).unwrap();

    assert_eq!(alice.decrypt(&b3, AD).unwrap(), b"B3");
    assert_eq!(alice.decrypt(&b1, AD).unwrap(), b"B1");
    assert_eq!(alice.decrypt(&b2, AD).unwrap(), b"B2");
}

#[test]
fn test_old_chain_messages_survive_ratchet() {
    let (mut alice, mut bob) = ratchet_pair();

    // alice sends three, bob only sees the first
    let a1 = alice.encrypt(b"old 0", AD).unwrap();
    let a2 = alice.encrypt(b"old 1", AD).unwrap();
    let a3 = alice.encrypt(b"old 2", AD).unwrap();
    bob.decrypt(&a1, AD).unwrap();

    // direction change ratchets both sides
    let b1 = bob.encrypt(b"turn", AD).unwrap();
    alice.decrypt(&b1, AD).unwrap();
    let a4 = alice.encrypt(b"new 0", AD).unwrap();
    bob.decrypt(&a4, AD).unwrap();

    // stragglers from the previous chain still decrypt
    assert_eq!(bob.decrypt(&a2, AD).unwrap(), b"old 1");
    assert_eq!(bob.decrypt(&a3, AD).unwrap(), b"old 2");
}

#[test]
fn test_long_conversation() {
    let (mut alice, mut bob) = ratchet_pair();

    for round in 0..20 {
        let a_text = format!("alice round {round}");
        let msg = alice.encrypt(a_text.as_bytes(), AD).unwrap();
        assert_eq!(bob.decrypt(&msg, AD).unwrap(), a_text.as_bytes());

        let b_text = format!("bob round {round}");
        let msg = bob.encrypt(b_text.as_bytes(), AD).unwrap();
        assert_eq!(alice.decrypt(&msg, AD).unwrap(), b_text.as_bytes());
    }
}

#[test]
fn test_tampered_payload_keeps_session_usable() {
    let (mut alice, mut bob) = ratchet_pair();

    let m1 = alice.encrypt(b"good", AD).unwrap();
    let mut tampered = m1.clone();
    let flipped = if tampered.ciphertext.as_bytes()[0] == b'0' {
        "1"
    } else {
        "0"
    };
    tampered.ciphertext.replace_range(0..1, flipped);

    assert_eq!(bob.decrypt(&tampered, AD), Err(Error::AuthFailure));
    // the genuine message still decrypts afterwards
    assert_eq!(bob.decrypt(&m1, AD).unwrap(), b"good");
}

#[test]
fn test_wrong_associated_data_fails() {
    let (mut alice, mut bob) = ratchet_pair();
    let msg = alice.encrypt(b"bound to ad", AD).unwrap();
    assert_eq!(
        bob.decrypt(&msg, b"different associated data"),
        Err(Error::AuthFailure)
    );
    assert_eq!(bob.decrypt(&msg, AD).unwrap(), b"bound to ad");
}

// --- header-encrypted variant ---

#[test]
fn test_he_in_order_pair() {
    let (mut alice, mut bob) = header_ratchet_pair();

    let msg = alice.encrypt(b"Hi Bob!", AD).unwrap();
    assert_eq!(bob.decrypt(&msg, AD).unwrap(), b"Hi Bob!");

    let reply = bob.encrypt(b"Hi Alice!", AD).unwrap();
    assert_eq!(alice.decrypt(&reply, AD).unwrap(), b"Hi Alice!");
}

#[test]
fn test_he_random_order_of_five() {
    let (mut alice, mut bob) = header_ratchet_pair();

    let plaintexts: Vec<String> = (1..=5).map(|i| format!("message {i}")).collect();
    let messages: Vec<_> = plaintexts
        .iter()
        .map(|p| alice.encrypt(p.as_bytes(), AD).unwrap())
        .collect();

    for index in [1usize, 4, 3, 2, 0] {
        let plaintext = bob.decrypt(&messages[index], AD).unwrap();
        assert_eq!(plaintext, plaintexts[index].as_bytes());
    }
}

#[test]
fn test_he_too_many_skipped() {
    let (mut alice, mut bob) = header_ratchet_pair();

    let mut last = None;
    for _ in 0..(MAX_SKIP + 2) {
        last = Some(alice.encrypt(b"flood", AD).unwrap());
    }

    assert_eq!(
        bob.decrypt(&last.unwrap(), AD),
        Err(Error::TooManySkipped)
    );
}

#[test]
fn test_he_cross_epoch_skip() {
    let (mut alice, mut bob) = header_ratchet_pair();

    let a1 = alice.encrypt(b"A1", AD).unwrap();
    bob.decrypt(&a1, AD).unwrap();

    let b1 = bob.encrypt(b"B1", AD).unwrap();
    let b2 = bob.encrypt(b"B2", AD).unwrap();
    let b3 = bob.encrypt(b"B3", AD).unwrap();

    assert_eq!(alice.decrypt(&b3, AD).unwrap(), b"B3");
    assert_eq!(alice.decrypt(&b1, AD).unwrap(), b"B1");
    assert_eq!(alice.decrypt(&b2, AD).unwrap(), b"B2");
}

#[test]
fn test_he_long_conversation() {
    let (mut alice, mut bob) = header_ratchet_pair();

    for round in 0..20 {
        let a_text = format!("alice round {round}");
        let msg = alice.encrypt(a_text.as_bytes(), AD).unwrap();
        assert_eq!(bob.decrypt(&msg, AD).unwrap(), a_text.as_bytes());

        let b_text = format!("bob round {round}");
        let msg = bob.encrypt(b_text.as_bytes(), AD).unwrap();
        assert_eq!(alice.decrypt(&msg, AD).unwrap(), b_text.as_bytes());
    }
}

// --- X3DH end-to-end through the server ---

#[test]
fn test_x3dh_end_to_end() {
    let mut server = Server::new();
    let mut alice = Client::new(&mut OsRng, "alice");
    let mut bob = Client::new(&mut OsRng, "bob");
    alice.register(&mut OsRng, &mut server);
    bob.register(&mut OsRng, &mut server);

    alice
        .send(
            &mut OsRng,
            &mut server,
            "bob",
            b"message encrypted with SK and AD",
        )
        .unwrap();

    let received = bob.receive(&mut server);
    assert_eq!(
        received,
        vec![Incoming {
            from: "alice".into(),
            plaintext: b"message encrypted with SK and AD".to_vec()
        }]
    );
}

#[test]
fn test_x3dh_conversation_continues_over_ratchet() {
    let mut server = Server::new();
    let mut alice = Client::new(&mut OsRng, "alice");
    let mut bob = Client::new(&mut OsRng, "bob");
    alice.register(&mut OsRng, &mut server);
    bob.register(&mut OsRng, &mut server);

    alice
        .send(&mut OsRng, &mut server, "bob", b"first")
        .unwrap();
    bob.receive(&mut server);

    for round in 0..5 {
        let b_text = format!("bob {round}");
        bob.send(&mut OsRng, &mut server, "alice", b_text.as_bytes())
            .unwrap();
        let got = alice.receive(&mut server);
        assert_eq!(got[0].plaintext, b_text.as_bytes());

        let a_text = format!("alice {round}");
        alice
            .send(&mut OsRng, &mut server, "bob", a_text.as_bytes())
            .unwrap();
        let got = bob.receive(&mut server);
        assert_eq!(got[0].plaintext, a_text.as_bytes());
    }
}

#[test]
fn test_one_time_prekeys_drain_after_ten_fetches() {
    let mut server = Server::new();
    let bob = Client::new(&mut OsRng, "bob");
    bob.register(&mut OsRng, &mut server);

    for _ in 0..10 {
        let bundle = server.prekey_bundle("bob").unwrap();
        assert!(bundle.one_time_prekey.is_some());
    }

    let drained = server.prekey_bundle("bob").unwrap();
    assert!(drained.one_time_prekey.is_none());
}

#[test]
fn test_handshakes_work_without_one_time_prekeys() {
    let mut server = Server::new();
    let mut bob = Client::new(&mut OsRng, "bob");
    bob.register(&mut OsRng, &mut server);

    // burn through bob's one-time prekey supply
    for _ in 0..10 {
        server.prekey_bundle("bob").unwrap();
    }

    let mut alice = Client::new(&mut OsRng, "alice");
    alice.register(&mut OsRng, &mut server);
    alice
        .send(&mut OsRng, &mut server, "bob", b"no opk left")
        .unwrap();

    let received = bob.receive(&mut server);
    assert_eq!(received[0].plaintext, b"no opk left");
}

#[test]
fn test_two_initiators_one_responder() {
    let mut server = Server::new();
    let mut alice = Client::new(&mut OsRng, "alice");
    let mut bob = Client::new(&mut OsRng, "bob");
    let mut carol = Client::new(&mut OsRng, "carol");
    alice.register(&mut OsRng, &mut server);
    bob.register(&mut OsRng, &mut server);
    carol.register(&mut OsRng, &mut server);

    alice
        .send(&mut OsRng, &mut server, "bob", b"from alice")
        .unwrap();
    carol
        .send(&mut OsRng, &mut server, "bob", b"from carol")
        .unwrap();

    let received = bob.receive(&mut server);
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].from, "alice");
    assert_eq!(received[0].plaintext, b"from alice");
    assert_eq!(received[1].from, "carol");
    assert_eq!(received[1].plaintext, b"from carol");
}
