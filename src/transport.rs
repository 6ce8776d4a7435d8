use anyhow::Result;
use libp2p::core::identity;
use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::{Boxed, Transport};
use libp2p::core::upgrade::Version;
use libp2p::noise::{Keypair as NoiseKeypair, NoiseConfig, X25519Spec};
use libp2p::tcp::TcpConfig;
use libp2p::yamux::YamuxConfig;
use libp2p::PeerId;
use std::time::Duration;

/// TCP + Noise + Yamux transport, grounded in the teacher's own
/// `src/transport.rs`. The teacher branches on a wasm target for a WebRTC
/// transport; that's out of scope here, so only the native path is kept.
pub fn build(keypair: identity::Keypair) -> Result<Boxed<(PeerId, StreamMuxerBox)>> {
    let tcp = TcpConfig::new().nodelay(true);
    let noise_keys = NoiseKeypair::<X25519Spec>::new().into_authentic(&keypair)?;
    Ok(tcp
        .upgrade(Version::V1)
        .authenticate(NoiseConfig::xx(noise_keys).into_authenticated())
        .multiplex(YamuxConfig::default())
        .timeout(Duration::from_secs(20))
        .boxed())
}
