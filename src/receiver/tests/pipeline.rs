use super::{WRAPPED_AES_KEY, sdp_body, stream, test_key};
use crate::audio::{AudioSink, MemorySink, PcmDecoderFactory};
use crate::protocol::rtp::{
    NtpTimestamp, RaopAudioPacket, RetransmitRequest, RetransmitResponse, SyncPacket,
};
use crate::protocol::sdp::StreamDescription;
use crate::receiver::audio_pipeline::{AudioHandler, AudioPipeline, ControlHandler};
use crate::receiver::channel::{ChannelRole, ChannelSet, PacketHandler, RtpChannel};
use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

fn pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

fn started_pipeline(sink: &Arc<MemorySink>) -> Arc<AudioPipeline> {
    let pipeline = AudioPipeline::new(&stream(), &PcmDecoderFactory, sink.clone()).unwrap();
    pipeline.start().unwrap();
    Arc::new(pipeline)
}

#[tokio::test]
async fn test_audio_reaches_sink() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = started_pipeline(&sink);

    let packet = RaopAudioPacket::new(1, 352, 0xAABB, pcm(&[1, -1, 300, -300])).with_marker();
    pipeline.process_audio(&packet.encode()).await.unwrap();

    assert_eq!(sink.packets(), vec![(352, vec![1, -1, 300, -300])]);
    assert_eq!(sink.format().unwrap().sample_rate, 44_100);
}

#[tokio::test]
async fn test_malformed_audio_is_rejected() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = started_pipeline(&sink);

    assert!(pipeline.process_audio(&[0x80, 0x60, 0x00]).await.is_err());
    assert!(sink.packets().is_empty());
}

#[tokio::test]
async fn test_gap_sends_retransmit_request() {
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let control = RtpChannel::bind(
        ChannelRole::Control,
        "127.0.0.1:0".parse().unwrap(),
        Some(sender.local_addr().unwrap()),
    )
    .await
    .unwrap();

    let sink = Arc::new(MemorySink::new());
    let pipeline = started_pipeline(&sink);
    pipeline.set_control(Some(control));

    for seq in [10u16, 14] {
        let packet = RaopAudioPacket::new(seq, u32::from(seq) * 352, 1, pcm(&[0, 0]));
        pipeline.process_audio(&packet.encode()).await.unwrap();
    }

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), sender.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let request = RetransmitRequest::decode(&buf[..n]).unwrap();
    assert_eq!(request.seq_start, 11);
    assert_eq!(request.count, 3);
    assert_eq!(sink.packets().len(), 2);
}

#[tokio::test]
async fn test_retransmitted_packet_is_delivered() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = started_pipeline(&sink);

    let packet = RaopAudioPacket::new(11, 3872, 1, pcm(&[5, 6]));
    let datagram = RetransmitResponse::encode(0, &packet.encode());
    pipeline.process_retransmitted(&datagram).unwrap();

    assert_eq!(sink.packets(), vec![(3872, vec![5, 6])]);
}

#[tokio::test]
async fn test_flush_clears_sink_and_sequence() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = started_pipeline(&sink);

    let first = RaopAudioPacket::new(100, 0, 1, pcm(&[1, 1]));
    pipeline.process_audio(&first.encode()).await.unwrap();
    pipeline.flush();

    // A new run after FLUSH is not treated as loss
    let next = RaopAudioPacket::new(500, 0, 1, pcm(&[2, 2]));
    pipeline.process_audio(&next.encode()).await.unwrap();

    assert_eq!(sink.flush_count(), 1);
    assert_eq!(sink.packets(), vec![(0, vec![2, 2])]);
}

#[tokio::test]
async fn test_encrypted_audio_is_decrypted() {
    let key = test_key();
    let body = format!(
        "{}a=rsaaeskey:{WRAPPED_AES_KEY}\r\na=aesiv:EREREREREREREREREREREQ\r\n",
        sdp_body()
    );
    let stream = StreamDescription::parse(&body, Some(&key)).unwrap();

    let sink = Arc::new(MemorySink::new());
    let pipeline = AudioPipeline::new(&stream, &PcmDecoderFactory, sink.clone()).unwrap();
    pipeline.start().unwrap();

    let samples: Vec<i16> = (0..10).collect();
    let mut payload = pcm(&samples);
    let aes_key: [u8; 16] = std::array::from_fn(|i| u8::try_from(i).unwrap());
    let cipher = Aes128::new(GenericArray::from_slice(&aes_key));
    let mut block = [0u8; 16];
    for (b, (p, iv)) in block.iter_mut().zip(payload[..16].iter().zip([0x11u8; 16])) {
        *b = p ^ iv;
    }
    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
    payload[..16].copy_from_slice(&block);

    let packet = RaopAudioPacket::new(1, 0, 1, payload);
    pipeline.process_audio(&packet.encode()).await.unwrap();

    assert_eq!(sink.packets(), vec![(0, samples)]);
}

#[tokio::test]
async fn test_control_handler_forwards_sync() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = started_pipeline(&sink);
    let handler = ControlHandler::new(pipeline);
    let channel = RtpChannel::bind(ChannelRole::Control, "127.0.0.1:0".parse().unwrap(), None)
        .await
        .unwrap();

    let sync = SyncPacket {
        extension: true,
        rtp_timestamp: 88_200,
        ntp_time: NtpTimestamp::from_u64(0x1234_5678_0000_0000),
        next_timestamp: 88_552,
    };
    handler
        .on_packet(
            &channel,
            Bytes::from(sync.encode()),
            "127.0.0.1:5000".parse().unwrap(),
        )
        .await;

    let (rtp, ntp) = sink.last_sync().unwrap();
    assert_eq!(rtp, 88_200);
    assert_eq!(ntp, sync.ntp_time);
}

#[tokio::test]
async fn test_audio_channel_end_to_end() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = started_pipeline(&sink);
    let mut channels = ChannelSet::new();
    let audio = channels
        .open(
            ChannelRole::Audio,
            "127.0.0.1:0".parse().unwrap(),
            None,
            Arc::new(AudioHandler::new(pipeline)),
        )
        .await
        .unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = RaopAudioPacket::new(3, 1056, 1, pcm(&[7, 8]));
    sender
        .send_to(&packet.encode(), audio.local_addr())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while sink.packets().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(sink.packets(), vec![(1056, vec![7, 8])]);
    sink.stop();
    channels.close_all().await;
}
