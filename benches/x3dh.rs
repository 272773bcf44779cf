use axolotl::xeddsa::XEdDSAPrivateKey;
use axolotl::{PreKeyBundle, PreKeyRecord, SecretKey};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand_core::{OsRng, RngCore};

fn signed_bundle() -> (SecretKey, SecretKey, SecretKey, PreKeyBundle) {
    let identity = SecretKey::generate(&mut OsRng);
    let prekey = SecretKey::generate(&mut OsRng);
    let opk = SecretKey::generate(&mut OsRng);

    let signer = XEdDSAPrivateKey::from_x25519_private(identity.as_bytes());
    let mut random = [0u8; 64];
    OsRng.fill_bytes(&mut random);
    let signature = signer.sign(prekey.public_key().as_bytes(), &random);

    let bundle = PreKeyBundle {
        identity_key: PreKeyRecord {
            id: 1,
            pk: identity.public_key(),
        },
        prekey: PreKeyRecord {
            id: 1,
            pk: prekey.public_key(),
        },
        signature,
        one_time_prekey: Some(PreKeyRecord {
            id: 1,
            pk: opk.public_key(),
        }),
        created_at: 0,
    };

    (identity, prekey, opk, bundle)
}

fn bench_initiate(c: &mut Criterion) {
    let (_, _, _, bundle) = signed_bundle();
    let alice_identity = SecretKey::generate(&mut OsRng);

    c.bench_function("x3dh_initiate", |b| {
        b.iter(|| black_box(axolotl::x3dh::initiate(&mut OsRng, &alice_identity, &bundle).unwrap()));
    });
}

fn bench_respond(c: &mut Criterion) {
    let (identity, prekey, opk, bundle) = signed_bundle();
    let alice_identity = SecretKey::generate(&mut OsRng);
    let init = axolotl::x3dh::initiate(&mut OsRng, &alice_identity, &bundle).unwrap();

    c.bench_function("x3dh_respond", |b| {
        b.iter(|| {
            black_box(
                axolotl::x3dh::respond(
                    &identity,
                    &prekey,
                    Some(&opk),
                    &alice_identity.public_key(),
                    &init.ephemeral_key,
                )
                .unwrap(),
            )
        });
    });
}

fn bench_xeddsa(c: &mut Criterion) {
    let secret = SecretKey::generate(&mut OsRng);
    let signer = XEdDSAPrivateKey::from_x25519_private(secret.as_bytes());
    let message = b"signed prekey bytes for benchmarking";
    let random = [9u8; 64];
    let signature = signer.sign(message, &random);
    let public =
        axolotl::xeddsa::XEdDSAPublicKey::from_x25519_public(&secret.public_key()).unwrap();

    c.bench_function("xeddsa_sign", |b| {
        b.iter(|| black_box(signer.sign(message, &random)));
    });

    c.bench_function("xeddsa_verify", |b| {
        b.iter(|| black_box(public.verify(message, &signature).unwrap()));
    });
}

criterion_group!(benches, bench_initiate, bench_respond, bench_xeddsa);
criterion_main!(benches);
