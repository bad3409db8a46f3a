use crate::access_unit::AccessUnit;
use crate::decoder::Decoder;
use crate::frame::FieldType;
use crate::parsers::h264::{RefListEntry, SeiPicStruct, SliceKind, SliceState};

use super::super::DxvaH264Decoder;
use super::super::accelerator::BufferType;
use super::super::structs::{DxvaSliceH264Long, PicEntry};
use super::helpers::*;

const LONG_RECORD_SIZE: usize = size_of::<DxvaSliceH264Long>();

fn long_records(state: &SharedAccelState) -> Vec<DxvaSliceH264Long> {
    let state = state.lock().unwrap();
    let last = state.executed.last().expect("应至少有一次 execute");
    let bytes = &last.data[&BufferType::SliceControl.dxva1_type_index()];
    assert_eq!(bytes.len() % LONG_RECORD_SIZE, 0, "切片控制应为整数条长格式记录");
    bytes
        .chunks_exact(LONG_RECORD_SIZE)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

fn b_slice(list0: u32, list1: u32) -> SliceState {
    SliceState {
        slice_type: 1,
        slice_kind: SliceKind::B,
        ref_count: [1, 1],
        ref_list: [
            vec![RefListEntry { frame_num: list0 }],
            vec![RefListEntry { frame_num: list1 }],
        ],
        ..SliceState::default()
    }
}

#[test]
fn test_long_records_carry_reference_lists() {
    let mut p = ScriptedPicture::frame(SliceKind::P, 2, 4, true);
    p.slices = vec![p_slice_referencing(&[1, 0]), p_slice_referencing(&[0])];
    let script = vec![
        ScriptedPicture::frame(SliceKind::I, 0, 0, true),
        ScriptedPicture::frame(SliceKind::P, 1, 2, true),
        p,
    ];
    let (mut dec, state) = build_decoder(script, 1);
    let (_, sample) = recording_sample();

    dec.decode(&AccessUnit::from_data(single_slice_au(NAL_IDR)), &sample)
        .expect("解码不应失败");
    dec.decode(&AccessUnit::from_data(single_slice_au(NAL_SLICE_REF)), &sample)
        .expect("解码不应失败");
    let two_slices = annexb(&[slice_nal(NAL_SLICE_REF, 0), slice_nal(NAL_SLICE_REF, 2)]);
    dec.decode(&AccessUnit::from_data(two_slices), &sample)
        .expect("解码不应失败");

    let records = long_records(&state);
    assert_eq!(records.len(), 2);

    let first = records[0];
    let (first_mb, num_mbs, slice_id) = (first.first_mb_in_slice, first.num_mbs_for_slice, first.slice_id);
    assert_eq!((first_mb, num_mbs, slice_id), (0, 2, 0));
    let lists = first.ref_pic_list;
    assert_eq!(lists[0][0], PicEntry::new(1, false), "frame_num 1 在表面 1");
    assert_eq!(lists[0][1], PicEntry::new(0, false));
    assert_eq!(lists[0][2], PicEntry::UNUSED);
    assert!(lists[1].iter().all(|e| *e == PicEntry::UNUSED), "P 切片不使用列表 1");
    let (l0, l1) = (first.num_ref_idx_l0_active_minus1, first.num_ref_idx_l1_active_minus1);
    assert_eq!((l0, l1), (1, 0));

    let second = records[1];
    let (first_mb, num_mbs, slice_id) = (second.first_mb_in_slice, second.num_mbs_for_slice, second.slice_id);
    assert_eq!((first_mb, num_mbs, slice_id), (2, 2, 1), "最后一个切片的宏块数由总数推算");
    let location = second.bs_nal_unit_data_location;
    let first_len = first.slice_bytes_in_buffer;
    assert_eq!(location, first_len, "切片在码流缓冲区中首尾相接");
    let lists = second.ref_pic_list;
    assert_eq!(lists[0][0], PicEntry::new(0, false));
}

#[test]
fn test_b_slice_fills_both_lists() {
    let mut b = ScriptedPicture::frame(SliceKind::B, 2, 2, false);
    b.slices = vec![b_slice(0, 1)];
    let script = vec![
        ScriptedPicture::frame(SliceKind::I, 0, 0, true),
        ScriptedPicture::frame(SliceKind::P, 1, 4, true),
        b,
    ];
    let (mut dec, state) = build_decoder(script, 1);
    let (_, sample) = recording_sample();
    for header in [NAL_IDR, NAL_SLICE_REF, NAL_SLICE_NONREF] {
        dec.decode(&AccessUnit::from_data(single_slice_au(header)), &sample)
            .expect("解码不应失败");
    }

    let records = long_records(&state);
    let lists = records[0].ref_pic_list;
    assert_eq!(lists[0][0], PicEntry::new(0, false));
    assert_eq!(lists[1][0], PicEntry::new(1, false));
    assert_eq!(lists[1][1], PicEntry::UNUSED);
}

fn field_association(sei: SeiPicStruct) -> PicEntry {
    let mut p = ScriptedPicture::field(FieldType::Top, SliceKind::P, 1, 4);
    p.sei_pic_struct = Some(sei);
    p.slices = vec![p_slice_referencing(&[0])];
    let script = vec![
        ScriptedPicture::field(FieldType::Top, SliceKind::I, 0, 0),
        ScriptedPicture::field(FieldType::Bottom, SliceKind::I, 0, 1),
        p,
    ];
    let (accel, state) = FakeAccelerator::new(1);
    let mut dec = DxvaH264Decoder::open(
        Box::new(accel),
        Box::new(FakeParser::with_sequence(interlaced_sequence(), script)),
        fast_options(),
    )
    .expect("打开 DXVA 解码器失败");
    let (_, sample) = recording_sample();
    for header in [NAL_IDR, NAL_IDR, NAL_SLICE_REF] {
        dec.decode(&AccessUnit::from_data(single_slice_au(header)), &sample)
            .expect("解码不应失败");
    }
    let records = long_records(&state);
    let lists = records[0].ref_pic_list;
    lists[0][0]
}

#[test]
fn test_field_reference_association_follows_sei() {
    for sei in [
        SeiPicStruct::BottomField,
        SeiPicStruct::TopBottom,
        SeiPicStruct::TopBottomTop,
    ] {
        assert_eq!(field_association(sei), PicEntry::new(0, true), "{sei:?} 应置 AssociatedFlag");
    }
    for sei in [
        SeiPicStruct::TopField,
        SeiPicStruct::BottomTop,
        SeiPicStruct::BottomTopBottom,
    ] {
        assert_eq!(field_association(sei), PicEntry::new(0, false), "{sei:?} 不置 AssociatedFlag");
    }
}
